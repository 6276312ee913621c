//! # 解析链模块
//!
//! 将页面/视频引用解析为可直接播放的流地址。注册的策略按顺序尝试
//! （嗅探 → 结构化JSON → 页面扫描 → 站点定制），第一个成功的结果
//! 使整条链短路；每次尝试都有独立超时，超时与出错等价，链条继续
//! 尝试下一个候选。耗时按整条链统计。

pub mod json_api;
pub mod media;
pub mod page_scan;
pub mod site;
pub mod sniff;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub use json_api::JsonApiStrategy;
pub use page_scan::PageScanStrategy;
pub use site::SiteStrategy;
pub use sniff::SniffStrategy;

use crate::error::{BofangError, BofangResult};
use crate::net::HttpClient;

/// Resolver chain configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Per-attempt timeout in seconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: u64,
    /// Structured-response parser endpoints; the target URL is appended
    /// URL-encoded. Empty means the target is requested directly.
    #[serde(default)]
    pub parse_endpoints: Vec<String>,
}

fn default_attempt_timeout() -> u64 {
    30
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: default_attempt_timeout(),
            parse_endpoints: Vec::new(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout == 0 {
            return Err(
                BofangError::config("resolver.attempt_timeout must be greater than 0").into(),
            );
        }
        Ok(())
    }
}

/// Per-site context handed to the strategies
#[derive(Debug, Clone, Default)]
pub struct SiteContext {
    /// Site key, when the caller knows which site the URL came from
    pub key: String,
    /// Headers the site requires on outbound fetches
    pub headers: HashMap<String, String>,
}

/// What a strategy produces on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Directly playable stream URL
    pub play_url: String,
    /// Headers required to fetch it
    pub headers: HashMap<String, String>,
}

impl Resolved {
    pub fn new(play_url: impl Into<String>) -> Self {
        Self {
            play_url: play_url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_headers(play_url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            play_url: play_url.into(),
            headers,
        }
    }
}

/// Outcome of one resolution. Produced exactly once per call, never
/// partially populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ParseResult {
    Success {
        play_url: String,
        headers: HashMap<String, String>,
        user_agent: Option<String>,
        referer: Option<String>,
        elapsed_ms: u64,
    },
    Failure {
        error: String,
        elapsed_ms: u64,
    },
}

impl ParseResult {
    fn from_resolved(resolved: Resolved, elapsed_ms: u64) -> Self {
        let user_agent = header_value(&resolved.headers, "user-agent");
        let referer = header_value(&resolved.headers, "referer");
        ParseResult::Success {
            play_url: resolved.play_url,
            headers: resolved.headers,
            user_agent,
            referer,
            elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ParseResult::Success { .. })
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            ParseResult::Success { elapsed_ms, .. } => *elapsed_ms,
            ParseResult::Failure { elapsed_ms, .. } => *elapsed_ms,
        }
    }
}

fn header_value(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

/// One pluggable resolution algorithm
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    /// Stable identifier, usable as a preferred-strategy hint
    fn id(&self) -> &'static str;

    /// Whether this strategy wants to try the given URL at all
    fn can_handle(&self, url: &str, site: &SiteContext) -> bool;

    /// Attempt to produce a playable URL
    async fn resolve(&self, url: &str, site: &SiteContext) -> BofangResult<Resolved>;
}

/// Ordered strategy set with fallback and per-attempt timeout
pub struct ResolverChain {
    strategies: Vec<Arc<dyn ResolveStrategy>>,
    attempt_timeout: Duration,
}

impl ResolverChain {
    /// Build the standard chain: sniff, structured JSON, page scan, site
    pub fn new(config: &ResolverConfig, client: HttpClient) -> Self {
        let strategies: Vec<Arc<dyn ResolveStrategy>> = vec![
            Arc::new(SniffStrategy::new(client.clone())),
            Arc::new(JsonApiStrategy::new(
                client.clone(),
                config.parse_endpoints.clone(),
            )),
            Arc::new(PageScanStrategy::new(client.clone())),
            Arc::new(SiteStrategy::new(client)),
        ];
        Self {
            strategies,
            attempt_timeout: Duration::from_secs(config.attempt_timeout),
        }
    }

    /// Build a chain from explicit strategies (tests, custom setups)
    pub fn with_strategies(
        strategies: Vec<Arc<dyn ResolveStrategy>>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            strategies,
            attempt_timeout,
        }
    }

    /// Resolve a URL, trying the preferred strategy first when given.
    /// Elapsed time in the result covers the whole chain.
    pub async fn resolve(
        &self,
        url: &str,
        site: &SiteContext,
        preferred: Option<&str>,
    ) -> ParseResult {
        let started = Instant::now();

        if let Some(id) = preferred {
            if let Some(strategy) = self.strategies.iter().find(|s| s.id() == id) {
                if let Ok(resolved) = self.attempt(strategy.as_ref(), url, site).await {
                    info!("resolved {} via preferred strategy '{}'", url, id);
                    return ParseResult::from_resolved(resolved, elapsed_ms(started));
                }
            }
        }

        for strategy in &self.strategies {
            if preferred == Some(strategy.id()) {
                continue;
            }
            if !strategy.can_handle(url, site) {
                continue;
            }
            match self.attempt(strategy.as_ref(), url, site).await {
                Ok(resolved) => {
                    info!("resolved {} via strategy '{}'", url, strategy.id());
                    return ParseResult::from_resolved(resolved, elapsed_ms(started));
                }
                Err(e) => {
                    debug!("strategy '{}' failed for {}: {}", strategy.id(), url, e);
                }
            }
        }

        ParseResult::Failure {
            error: "no strategy resolved the url".to_string(),
            elapsed_ms: elapsed_ms(started),
        }
    }

    /// One attempt under the fixed timeout. A timeout reads exactly like a
    /// strategy error: the caller proceeds to the next candidate. The
    /// abandoned attempt's in-flight request is dropped, not awaited.
    async fn attempt(
        &self,
        strategy: &dyn ResolveStrategy,
        url: &str,
        site: &SiteContext,
    ) -> BofangResult<Resolved> {
        match tokio::time::timeout(self.attempt_timeout, strategy.resolve(url, site)).await {
            Ok(result) => result,
            Err(_) => Err(BofangError::timeout(
                self.attempt_timeout,
                format!("strategy '{}'", strategy.id()),
            )),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}
