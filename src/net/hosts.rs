use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::{BofangError, BofangResult};

/// Hosts and DNS cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostsConfig {
    /// JSON array file persisting the override table
    #[serde(default = "default_file")]
    pub file: String,
    /// Overrides declared inline in the config
    #[serde(default)]
    pub entries: Vec<HostEntry>,
    /// Maximum number of cached DNS results
    #[serde(default = "default_dns_cache_size")]
    pub dns_cache_size: usize,
    /// Lifetime of a cached DNS result, in seconds
    #[serde(default = "default_dns_ttl")]
    pub dns_ttl: u64,
}

fn default_file() -> String {
    "hosts.json".to_string()
}

fn default_dns_cache_size() -> usize {
    256
}

fn default_dns_ttl() -> u64 {
    300
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            file: default_file(),
            entries: Vec::new(),
            dns_cache_size: default_dns_cache_size(),
            dns_ttl: default_dns_ttl(),
        }
    }
}

impl HostsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dns_cache_size == 0 {
            return Err(
                BofangError::config("hosts.dns_cache_size must be greater than 0").into(),
            );
        }
        Ok(())
    }
}

/// One domain to IP override. `ttl` is in seconds; 0 or negative means the
/// entry never expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub domain: String,
    pub ip: String,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl HostEntry {
    pub fn new(domain: &str, ip: &str, ttl: i64) -> Self {
        let now = Utc::now();
        Self {
            domain: domain.to_string(),
            ip: ip.to_string(),
            ttl,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.ttl > 0 && Utc::now() - self.created_at > ChronoDuration::seconds(self.ttl)
    }
}

/// Cached DNS result. Internal and never persisted, unlike [`HostEntry`].
#[derive(Debug, Clone)]
pub struct DnsCacheEntry {
    pub domain: String,
    pub ip: IpAddr,
    pub expire_time: Instant,
    pub created_at: Instant,
}

impl DnsCacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expire_time
    }
}

/// Domain to IP resolution with a static override table in front of a
/// size-bounded DNS cache; consulted before any outbound fetch.
pub struct HostsResolver {
    config: HostsConfig,
    table: RwLock<HashMap<String, HostEntry>>,
    dns_cache: RwLock<HashMap<String, DnsCacheEntry>>,
    resolver: TokioAsyncResolver,
}

impl HostsResolver {
    pub fn new(config: HostsConfig) -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let mut table = HashMap::new();
        for entry in &config.entries {
            table.insert(entry.domain.clone(), entry.clone());
        }
        Self {
            config,
            table: RwLock::new(table),
            dns_cache: RwLock::new(HashMap::new()),
            resolver,
        }
    }

    /// Resolve a domain: override table, then DNS cache, then live lookup
    pub async fn resolve(&self, domain: &str) -> Option<IpAddr> {
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return Some(ip);
        }

        if let Some(ip) = self.override_ip(domain).await {
            return Some(ip);
        }

        {
            let cache = self.dns_cache.read().await;
            if let Some(entry) = cache.get(domain) {
                if !entry.is_expired() {
                    return Some(entry.ip);
                }
            }
        }

        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => {
                let ip = lookup.iter().next()?;
                self.cache_dns(domain, ip).await;
                debug!("resolved {} -> {}", domain, ip);
                Some(ip)
            }
            Err(e) => {
                debug!("DNS lookup failed for {}: {}", domain, e);
                None
            }
        }
    }

    /// IP from the override table only, respecting enabled flag and TTL
    pub async fn override_ip(&self, domain: &str) -> Option<IpAddr> {
        let table = self.table.read().await;
        let entry = table.get(domain)?;
        if !entry.enabled || entry.is_expired() {
            return None;
        }
        entry.ip.parse().ok()
    }

    /// Insert or replace an override
    pub async fn set_override(&self, entry: HostEntry) {
        let mut table = self.table.write().await;
        table.insert(entry.domain.clone(), entry);
    }

    /// Remove an override
    pub async fn remove_override(&self, domain: &str) -> Option<HostEntry> {
        let mut table = self.table.write().await;
        table.remove(domain)
    }

    /// Cache a DNS result, evicting when over budget
    pub async fn cache_dns(&self, domain: &str, ip: IpAddr) {
        let now = Instant::now();
        let entry = DnsCacheEntry {
            domain: domain.to_string(),
            ip,
            expire_time: now + std::time::Duration::from_secs(self.config.dns_ttl),
            created_at: now,
        };

        let mut cache = self.dns_cache.write().await;
        cache.insert(domain.to_string(), entry);

        if cache.len() > self.config.dns_cache_size {
            Self::evict(&mut cache, self.config.dns_cache_size);
        }
    }

    /// Expired entries go first; if the cache is still over budget, the
    /// oldest 25% by creation time are dropped.
    fn evict(cache: &mut HashMap<String, DnsCacheEntry>, cap: usize) {
        cache.retain(|_, entry| !entry.is_expired());
        if cache.len() <= cap {
            return;
        }

        let mut by_age: Vec<(String, Instant)> = cache
            .iter()
            .map(|(domain, entry)| (domain.clone(), entry.created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        let drop_count = (cache.len() / 4).max(1);
        for (domain, _) in by_age.into_iter().take(drop_count) {
            cache.remove(&domain);
        }
    }

    /// Number of live DNS cache entries
    pub async fn dns_cache_len(&self) -> usize {
        self.dns_cache.read().await.len()
    }

    /// Load the override table from its JSON array file.
    /// A missing file is not an error; a corrupt one is logged and skipped.
    pub async fn load_table<P: AsRef<Path>>(&self, path: P) -> BofangResult<()> {
        let content = match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(BofangError::cache_io(format!(
                    "read {}: {}",
                    path.as_ref().display(),
                    e
                )))
            }
        };

        match serde_json::from_str::<Vec<HostEntry>>(&content) {
            Ok(entries) => {
                let mut table = self.table.write().await;
                for entry in entries {
                    table.insert(entry.domain.clone(), entry);
                }
                info!("loaded {} host overrides", table.len());
                Ok(())
            }
            Err(e) => {
                warn!("host table {} unreadable: {}", path.as_ref().display(), e);
                Ok(())
            }
        }
    }

    /// Persist the override table as a JSON array file, one record per line
    pub async fn save_table<P: AsRef<Path>>(&self, path: P) -> BofangResult<()> {
        let entries: Vec<HostEntry> = {
            let table = self.table.read().await;
            table.values().cloned().collect()
        };

        let mut json = String::from("[\n");
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                json.push_str(",\n");
            }
            json.push_str(&serde_json::to_string(entry)?);
        }
        json.push_str("\n]\n");

        tokio::fs::write(path.as_ref(), json).await.map_err(|e| {
            BofangError::cache_io(format!("write {}: {}", path.as_ref().display(), e))
        })?;
        Ok(())
    }
}
