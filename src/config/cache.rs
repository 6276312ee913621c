use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::BofangError;

/// Storage tiers available to a cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Entries live in memory only
    MemoryOnly,
    /// Entries are mirrored to one file per key and promoted back on miss
    MemoryAndDisk,
}

/// Base cache engine configuration.
///
/// The specialized instances (content, network-response, image, config,
/// play-history) are derived from this base through [`CacheProfile`];
/// they share the engine and differ only in budget, TTL and tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Whether caching is enabled at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Root directory for the disk tier (one subdirectory per profile)
    #[serde(default = "default_directory")]
    pub directory: String,
    /// Total byte budget shared proportionally across profiles
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Default TTL in seconds; 0 or negative means "never expires"
    #[serde(default = "default_ttl")]
    pub default_ttl: i64,
    /// Background expiry sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
    /// Default storage tier
    #[serde(default = "default_tier")]
    pub tier: CacheTier,
}

fn default_enabled() -> bool {
    true
}

fn default_directory() -> String {
    "cache".to_string()
}

fn default_max_size() -> u64 {
    100 * 1024 * 1024
}

fn default_ttl() -> i64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_tier() -> CacheTier {
    CacheTier::MemoryAndDisk
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            directory: default_directory(),
            max_size: default_max_size(),
            default_ttl: default_ttl(),
            sweep_interval: default_sweep_interval(),
            tier: default_tier(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.max_size == 0 {
            return Err(BofangError::config("cache.max_size must be greater than 0").into());
        }
        if self.enabled && self.sweep_interval == 0 {
            return Err(
                BofangError::config("cache.sweep_interval must be greater than 0").into(),
            );
        }
        Ok(())
    }
}

/// Named cache specializations; each is a configuration variant of the
/// same engine (budget share, TTL multiplier, tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheProfile {
    /// Resolved play URLs and headers
    Content,
    /// Raw upstream response bodies
    NetworkResponse,
    /// Poster / artwork bytes
    Image,
    /// Site configuration documents
    SiteConfig,
    /// Recently played targets
    PlayHistory,
}

impl CacheProfile {
    /// Subdirectory of the cache root used by the disk tier
    pub fn dir_name(&self) -> &'static str {
        match self {
            CacheProfile::Content => "content",
            CacheProfile::NetworkResponse => "network",
            CacheProfile::Image => "image",
            CacheProfile::SiteConfig => "config",
            CacheProfile::PlayHistory => "history",
        }
    }

    /// Fraction of the total byte budget granted to this profile
    pub fn budget_share(&self) -> f64 {
        match self {
            CacheProfile::Content => 0.10,
            CacheProfile::NetworkResponse => 0.30,
            CacheProfile::Image => 0.40,
            CacheProfile::SiteConfig => 0.10,
            CacheProfile::PlayHistory => 0.10,
        }
    }

    /// TTL in seconds derived from the configured default; 0 = never expires
    pub fn ttl(&self, default_ttl: i64) -> i64 {
        match self {
            // Play URLs go stale quickly on most sites
            CacheProfile::Content => default_ttl.min(600),
            CacheProfile::NetworkResponse => default_ttl,
            CacheProfile::Image => default_ttl.saturating_mul(24),
            CacheProfile::SiteConfig => default_ttl.saturating_mul(24),
            // History is a record, not a freshness-bound value
            CacheProfile::PlayHistory => 0,
        }
    }

    /// Whether this profile keeps a disk tier when the base config allows it
    pub fn tier(&self, base: CacheTier) -> CacheTier {
        match self {
            // Resolved URLs are cheap to recompute and expire fast
            CacheProfile::Content => CacheTier::MemoryOnly,
            _ => base,
        }
    }
}
