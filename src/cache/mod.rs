use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod disk;
pub mod store;

pub use disk::DiskTier;
pub use store::CacheStore;

// Re-export config types for convenience
pub use crate::config::{CacheConfig, CacheProfile, CacheTier};

/// A single cached value with its bookkeeping.
///
/// `ttl` is in seconds; 0 or negative means the entry never expires.
/// `last_access` and `access_count` are updated on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Cache key
    pub key: String,
    /// Cached value
    pub value: T,
    /// Creation timestamp
    pub create_time: DateTime<Utc>,
    /// Last access timestamp (drives LRU eviction)
    pub last_access: DateTime<Utc>,
    /// Time to live in seconds; 0 or negative = never expires
    pub ttl: i64,
    /// Serialized size in bytes
    pub size_bytes: u64,
    /// Number of reads since creation
    #[serde(default)]
    pub access_count: u64,
}

impl<T> CacheEntry<T> {
    /// Create a new entry stamped with the current time
    pub fn new(key: String, value: T, ttl: i64, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            key,
            value,
            create_time: now,
            last_access: now,
            ttl,
            size_bytes,
            access_count: 0,
        }
    }

    /// An entry is expired iff it has a positive TTL and its age exceeds it
    pub fn is_expired(&self) -> bool {
        self.ttl > 0 && Utc::now() - self.create_time > ChronoDuration::seconds(self.ttl)
    }

    /// Record a read
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
        self.access_count += 1;
    }
}

/// Configuration of one cache store instance.
///
/// The specialized stores (content, network-response, image, site-config,
/// play-history) are all built through [`CacheStoreConfig::for_profile`];
/// they differ only in these numbers.
#[derive(Debug, Clone)]
pub struct CacheStoreConfig {
    /// Instance name, used in logs and the disk subdirectory
    pub name: String,
    /// Whether this store actually caches anything
    pub enabled: bool,
    /// Byte budget; eviction keeps the store under this
    pub max_size: u64,
    /// Default TTL in seconds applied when a put does not override it
    pub default_ttl: i64,
    /// Background expiry sweep interval
    pub sweep_interval: std::time::Duration,
    /// Storage tier
    pub tier: CacheTier,
    /// Disk tier directory (required when tier is MemoryAndDisk)
    pub disk_dir: Option<PathBuf>,
}

impl CacheStoreConfig {
    /// Derive the store configuration for a named specialization
    pub fn for_profile(base: &CacheConfig, profile: CacheProfile) -> Self {
        let tier = profile.tier(base.tier);
        let disk_dir = match tier {
            CacheTier::MemoryAndDisk => {
                Some(PathBuf::from(&base.directory).join(profile.dir_name()))
            }
            CacheTier::MemoryOnly => None,
        };
        Self {
            name: profile.dir_name().to_string(),
            enabled: base.enabled,
            max_size: (base.max_size as f64 * profile.budget_share()) as u64,
            default_ttl: profile.ttl(base.default_ttl),
            sweep_interval: std::time::Duration::from_secs(base.sweep_interval),
            tier,
            disk_dir,
        }
    }
}

/// Monotonic cache statistics.
///
/// Counters only ever grow; `clear()` on the store does not touch them.
/// They are reset exclusively through an explicit [`CacheCounters::reset`].
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub puts: AtomicU64,
    pub removes: AtomicU64,
    pub evictions: AtomicU64,
    pub expired_swept: AtomicU64,
    pub bytes_written: AtomicU64,
    pub bytes_read: AtomicU64,
}

impl CacheCounters {
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_swept: self.expired_swept.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    /// Operator-requested reset; the only way counters go back to zero
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.removes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expired_swept.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub removes: u64,
    pub evictions: u64,
    pub expired_swept: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

impl CacheStats {
    /// Hit ratio as a percentage
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Total lookups (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}
