//! # 代理服务器模块
//!
//! 回环HTTP入口：`/proxy`原样转发、`/player`解析后回流、其余相对路径
//! 作为静态资源。每个被接受的连接由独立任务处理，单个连接内的读写
//! 严格串行。

pub mod connection;
pub mod http;
pub mod server;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use connection::ProxyConnection;
pub use http::{ProxyRequest, ProxyResponse};
pub use server::ProxyServer;

use crate::cache::CacheStore;
use crate::config::ServerConfig;
use crate::net::{BandwidthLimiter, HttpClient};
use crate::resolver::ResolverChain;
use crate::rules::RuleEngine;
use crate::spider::Spider;

/// A resolution worth caching: the playable URL plus its fetch headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResolution {
    pub play_url: String,
    pub headers: HashMap<String, String>,
}

/// One entry of the play-history cache specialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRecord {
    pub url: String,
    pub play_url: String,
    pub played_at: chrono::DateTime<chrono::Utc>,
}

/// Monotonic connection counters, shared between the accept loop and the
/// stats route. `active` tracks the live registry size.
#[derive(Debug, Default)]
pub struct ServerCounters {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub denied: AtomicU64,
    pub handled: AtomicU64,
    pub active: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub denied: u64,
    pub handled: u64,
    pub active: u64,
}

impl ServerCounters {
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Services shared by every connection task
pub struct ServerContext {
    pub config: ServerConfig,
    pub rules: Arc<RuleEngine>,
    pub chain: Arc<ResolverChain>,
    pub content_cache: CacheStore<CachedResolution>,
    pub play_history: CacheStore<PlayRecord>,
    pub client: HttpClient,
    pub bandwidth: Arc<BandwidthLimiter>,
    pub spider: Arc<dyn Spider>,
    pub counters: Arc<ServerCounters>,
}
