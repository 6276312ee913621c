use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::CacheEntry;
use crate::error::{BofangError, BofangResult};

/// Disk tier of a cache store: one file per key, each holding a single
/// line-oriented JSON record of the entry. Unknown fields in a record are
/// ignored on read, so the format is forward compatible.
///
/// Every failure here is a [`BofangError::CacheIo`]; callers log it and
/// treat the operation as a miss (the cache is fail-open).
#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    /// Open (and create if needed) the tier directory
    pub fn open<P: AsRef<Path>>(dir: P) -> BofangResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| BofangError::cache_io(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys may contain URL characters; the file name is a stable hash
        // and the record itself carries the key for verification.
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.dir.join(format!("{:016x}.json", hasher.finish()))
    }

    /// Persist an entry record
    pub async fn store<T: Serialize>(&self, entry: &CacheEntry<T>) -> BofangResult<()> {
        let path = self.path_for(&entry.key);
        let mut record = serde_json::to_string(entry)
            .map_err(|e| BofangError::cache_io(format!("serialize {}: {}", entry.key, e)))?;
        record.push('\n');
        tokio::fs::write(&path, record)
            .await
            .map_err(|e| BofangError::cache_io(format!("write {}: {}", path.display(), e)))?;
        debug!("persisted cache entry {} to {}", entry.key, path.display());
        Ok(())
    }

    /// Load the entry for a key, if present and readable.
    ///
    /// A hash collision or a corrupt record reads as `None`.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> BofangResult<Option<CacheEntry<T>>> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BofangError::cache_io(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let line = content.lines().next().unwrap_or_default();
        match serde_json::from_str::<CacheEntry<T>>(line) {
            Ok(entry) if entry.key == key => Ok(Some(entry)),
            Ok(entry) => {
                warn!(
                    "cache file {} holds key {}, wanted {}",
                    path.display(),
                    entry.key,
                    key
                );
                Ok(None)
            }
            Err(e) => Err(BofangError::cache_io(format!(
                "decode {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Remove the file for a key; missing files are fine
    pub async fn remove(&self, key: &str) -> BofangResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BofangError::cache_io(format!(
                "remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Remove every record in the tier
    pub async fn clear(&self) -> BofangResult<()> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| BofangError::cache_io(format!("list {}: {}", self.dir.display(), e)))?;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| BofangError::cache_io(format!("list {}: {}", self.dir.display(), e)))?
        {
            if let Err(e) = tokio::fs::remove_file(item.path()).await {
                warn!("failed to remove {}: {}", item.path().display(), e);
            }
        }
        Ok(())
    }
}
