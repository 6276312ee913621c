//! # Bofang - 本地媒体代理与内容解析网关
//!
//! Bofang是一个用Rust编写的本地媒体代理，把第三方内容站点的页面/视频
//! 引用解析为可直接播放的流地址，并通过回环HTTP端点统一回放给播放器
//! （统一User-Agent/Referer，屏蔽各站点差异）。
//!
//! ## 核心功能
//!
//! - **回环代理服务**: `/proxy`原样转发、`/player`解析后回流
//! - **多策略解析链**: 嗅探 / 结构化JSON / 页面扫描 / 站点定制，逐个回退
//! - **分层缓存**: 内存+磁盘两级、TTL过期、LRU逐出、命中统计
//! - **访问与带宽治理**: 白名单准入、按窗口的字节预算
//! - **域名覆盖**: hosts覆盖表与DNS结果缓存
//! - **规则引擎**: 解析前按优先级改写或转发URL，配置热重载
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use bofang::config::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file_with_env("config.toml").await?;
//! let server = bofang::build_server(&config).await?;
//! let port = server.start(config.server.port).await?;
//! println!("listening on 127.0.0.1:{}", port);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod net;
pub mod resolver;
pub mod rules;
pub mod server;
pub mod spider;

use std::sync::Arc;

// Re-export commonly used types
pub use cache::{CacheCounters, CacheEntry, CacheStats, CacheStore, CacheStoreConfig};
pub use error::{BofangError, BofangResult, ErrorSeverity};
pub use net::{AccessGuard, BandwidthLimiter, HostsResolver, HttpClient};
pub use resolver::{ParseResult, ResolveStrategy, ResolverChain, SiteContext};
pub use rules::{MatchContext, ProxyRule, RuleEngine};
pub use server::{ProxyServer, ServerContext};
pub use spider::{NullSpider, PlayDescriptor, Spider};

/// Wire the service graph from a configuration: hosts resolver, shared
/// HTTP client, resolver chain, rule engine, caches, limiter, server.
/// Everything is an explicitly constructed instance, injected top-down.
pub async fn build_server(config: &config::Config) -> BofangResult<ProxyServer> {
    let hosts = Arc::new(HostsResolver::new(config.hosts.clone()));
    hosts.load_table(&config.hosts.file).await?;
    let client = HttpClient::new(Arc::clone(&hosts));

    let chain = Arc::new(ResolverChain::new(&config.resolver, client.clone()));
    let rules = Arc::new(RuleEngine::new(
        config.rules.clone().unwrap_or_default(),
    )?);

    let content_cache =
        CacheStore::for_profile(&config.cache, config::CacheProfile::Content);
    let play_history =
        CacheStore::for_profile(&config.cache, config::CacheProfile::PlayHistory);
    let bandwidth = Arc::new(BandwidthLimiter::new(config.bandwidth.clone()));
    let counters = Arc::new(server::ServerCounters::default());

    let ctx = Arc::new(ServerContext {
        config: config.server.clone(),
        rules,
        chain,
        content_cache,
        play_history,
        client,
        bandwidth,
        spider: Arc::new(NullSpider),
        counters,
    });

    Ok(ProxyServer::new(
        ctx,
        AccessGuard::new(config.access.clone()),
    ))
}
