use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::{CacheCounters, CacheEntry, CacheStats, CacheStoreConfig};
use crate::config::{CacheConfig, CacheProfile, CacheTier};
use crate::error::BofangResult;

/// Generic key/entry store with TTL, memory/disk tiers and LRU eviction.
///
/// Lookup order is memory first, then the disk tier (when the tier
/// configuration allows it), promoting disk hits back into memory. Writes
/// always land in memory and are persisted to disk off the request-serving
/// path. Disk failures are logged and degrade to miss semantics; they never
/// reach the caller.
#[derive(Clone)]
pub struct CacheStore<T> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<T>>>>,
    config: CacheStoreConfig,
    counters: Arc<CacheCounters>,
    current_size: Arc<AtomicU64>,
    disk: Option<super::DiskTier>,
    sweep_handle: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl<T> CacheStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store and start its background expiry sweep
    pub fn new(config: CacheStoreConfig) -> Self {
        let disk = match (&config.disk_dir, config.tier) {
            (Some(dir), CacheTier::MemoryAndDisk) if config.enabled => {
                match super::DiskTier::open(dir) {
                    Ok(tier) => Some(tier),
                    Err(e) => {
                        // Fail open: run memory-only rather than refuse to start
                        warn!("cache '{}' disk tier unavailable: {}", config.name, e);
                        None
                    }
                }
            }
            _ => None,
        };

        let store = Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
            counters: Arc::new(CacheCounters::default()),
            current_size: Arc::new(AtomicU64::new(0)),
            disk,
            sweep_handle: Arc::new(StdMutex::new(None)),
        };

        if store.config.enabled {
            store.start_sweep_task();
        }

        store
    }

    /// Build the store for a named specialization of the base configuration
    pub fn for_profile(base: &CacheConfig, profile: CacheProfile) -> Self {
        Self::new(CacheStoreConfig::for_profile(base, profile))
    }

    /// Look up a value. Expired entries read as misses and are removed.
    pub async fn get(&self, key: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        // Memory tier; reads mutate last_access/access_count
        {
            let mut entries = self.entries.write().await;
            let mut expired_size = None;
            if let Some(entry) = entries.get_mut(key) {
                if entry.is_expired() {
                    expired_size = Some(entry.size_bytes);
                } else {
                    entry.touch();
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .bytes_read
                        .fetch_add(entry.size_bytes, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            }
            // Lazy removal: an expired entry reads as a miss
            if let Some(size) = expired_size {
                entries.remove(key);
                self.current_size.fetch_sub(size, Ordering::Relaxed);
                drop(entries);
                self.remove_from_disk(key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        // Disk tier; a hit is promoted back into memory
        if let Some(disk) = &self.disk {
            match disk.load::<T>(key).await {
                Ok(Some(mut entry)) => {
                    if entry.is_expired() {
                        if let Err(e) = disk.remove(key).await {
                            warn!("cache '{}': {}", self.config.name, e);
                        }
                    } else {
                        entry.touch();
                        let value = entry.value.clone();
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        self.counters
                            .bytes_read
                            .fetch_add(entry.size_bytes, Ordering::Relaxed);
                        self.insert_entry(entry).await;
                        debug!("cache '{}' promoted {} from disk", self.config.name, key);
                        return Some(value);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // CacheIo degrades to a miss
                    warn!("cache '{}': {}", self.config.name, e);
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value. Returns `Ok(false)` when the store is disabled or the
    /// entry is larger than 10% of the byte budget (rejected outright).
    pub async fn put(
        &self,
        key: &str,
        value: T,
        ttl: Option<i64>,
        tier: Option<CacheTier>,
    ) -> BofangResult<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        let serialized = serde_json::to_vec(&value)?;
        let size_bytes = (serialized.len() + key.len()) as u64;

        if size_bytes > self.config.max_size / 10 {
            debug!(
                "cache '{}' rejected oversized entry {} ({} bytes)",
                self.config.name, key, size_bytes
            );
            return Ok(false);
        }

        self.ensure_space(size_bytes).await;

        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry::new(key.to_string(), value, ttl, size_bytes);

        let effective_tier = tier.unwrap_or(self.config.tier);
        if effective_tier == CacheTier::MemoryAndDisk {
            if let Some(disk) = self.disk.clone() {
                // Persist off the request-serving path; failures are fail-open
                let record = entry.clone();
                let name = self.config.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = disk.store(&record).await {
                        warn!("cache '{}' persist failed: {}", name, e);
                    }
                });
            }
        }

        self.insert_entry(entry).await;
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_written
            .fetch_add(size_bytes, Ordering::Relaxed);
        Ok(true)
    }

    /// Remove a key from both tiers
    pub async fn remove(&self, key: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        let removed = {
            let mut entries = self.entries.write().await;
            entries.remove(key)
        };

        if let Some(entry) = &removed {
            self.current_size
                .fetch_sub(entry.size_bytes, Ordering::Relaxed);
        }
        self.remove_from_disk(key).await;

        if removed.is_some() {
            self.counters.removes.fetch_add(1, Ordering::Relaxed);
        }
        removed.map(|e| e.value)
    }

    /// Drop every entry. Statistics are NOT reset by clearing.
    pub async fn clear(&self) {
        {
            let mut entries = self.entries.write().await;
            entries.clear();
        }
        self.current_size.store(0, Ordering::Relaxed);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.clear().await {
                warn!("cache '{}': {}", self.config.name, e);
            }
        }
        info!("cache '{}' cleared", self.config.name);
    }

    /// Snapshot of the monotonic counters
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Operator-requested counter reset
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Number of live in-memory entries
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Current in-memory size in bytes
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Stop the background sweep task
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.sweep_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    async fn insert_entry(&self, entry: CacheEntry<T>) {
        let size = entry.size_bytes;
        let mut entries = self.entries.write().await;
        if let Some(old) = entries.insert(entry.key.clone(), entry) {
            self.current_size
                .fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        self.current_size.fetch_add(size, Ordering::Relaxed);
    }

    /// Evict least-recently-used entries until the new entry fits
    async fn ensure_space(&self, needed: u64) {
        if self.current_size.load(Ordering::Relaxed) + needed <= self.config.max_size {
            return;
        }

        let mut entries = self.entries.write().await;
        let mut by_access: Vec<(String, chrono::DateTime<chrono::Utc>, u64)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_access, entry.size_bytes))
            .collect();
        by_access.sort_by_key(|(_, last_access, _)| *last_access);

        let mut evicted = 0u64;
        for (key, _, size) in by_access {
            if self.current_size.load(Ordering::Relaxed) + needed <= self.config.max_size
                || entries.is_empty()
            {
                break;
            }
            entries.remove(&key);
            self.current_size.fetch_sub(size, Ordering::Relaxed);
            evicted += 1;
            let disk = self.disk.clone();
            let name = self.config.name.clone();
            tokio::spawn(async move {
                if let Some(disk) = disk {
                    if let Err(e) = disk.remove(&key).await {
                        warn!("cache '{}': {}", name, e);
                    }
                }
            });
        }

        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!("cache '{}' evicted {} entries", self.config.name, evicted);
        }
    }

    async fn remove_from_disk(&self, key: &str) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.remove(key).await {
                warn!("cache '{}': {}", self.config.name, e);
            }
        }
    }

    /// Background sweep: the only path that removes entries purely for TTL
    fn start_sweep_task(&self) {
        let entries = Arc::clone(&self.entries);
        let current_size = Arc::clone(&self.current_size);
        let counters = Arc::clone(&self.counters);
        let disk = self.disk.clone();
        let name = self.config.name.clone();
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut sweep_interval = interval(period);
            // The first tick fires immediately; skip it
            sweep_interval.tick().await;

            loop {
                sweep_interval.tick().await;

                let expired: Vec<(String, u64)> = {
                    let mut guard = entries.write().await;
                    let stale: Vec<(String, u64)> = guard
                        .iter()
                        .filter(|(_, entry)| entry.is_expired())
                        .map(|(key, entry)| (key.clone(), entry.size_bytes))
                        .collect();
                    for (key, _) in &stale {
                        guard.remove(key);
                    }
                    stale
                };

                if expired.is_empty() {
                    continue;
                }

                let mut freed = 0u64;
                for (key, size) in &expired {
                    current_size.fetch_sub(*size, Ordering::Relaxed);
                    freed += size;
                    if let Some(disk) = &disk {
                        if let Err(e) = disk.remove(key).await {
                            warn!("cache '{}': {}", name, e);
                        }
                    }
                }

                counters
                    .expired_swept
                    .fetch_add(expired.len() as u64, Ordering::Relaxed);
                debug!(
                    "cache '{}' swept {} expired entries ({} bytes)",
                    name,
                    expired.len(),
                    freed
                );
            }
        });

        if let Ok(mut guard) = self.sweep_handle.lock() {
            *guard = Some(handle);
        }
    }
}
