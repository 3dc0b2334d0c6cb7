//! File-backed TTL cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quizforge_core::traits::VolatileCache;

use crate::fs;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// [`VolatileCache`] keeping one `{ value, expires_at }` file per key.
///
/// Expired entries read as absent and are removed on the read that finds
/// them. Survives process restarts, which lets separate CLI invocations
/// share cached quiz variants.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(fs::file_name(key))
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for path in fs::list_files(&self.dir).await? {
            let live = match fs::read_json::<CacheEntry>(&path).await {
                Ok(Some(entry)) => entry.is_live(now),
                Ok(None) => continue,
                Err(e) => {
                    warn!("dropping unreadable cache entry: {e:#}");
                    false
                }
            };
            if !live && fs::remove(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl VolatileCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        let Some(entry) = fs::read_json::<CacheEntry>(&path).await? else {
            return Ok(None);
        };
        if entry.is_live(Utc::now()) {
            return Ok(Some(entry.value));
        }
        debug!(key, "cache entry expired");
        fs::remove(&path).await?;
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl).context("cache TTL out of range")?;
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Utc::now() + ttl,
        };
        fs::write_json(self.entry_path(key), &entry, true).await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for path in fs::list_files(&self.dir).await? {
            let matches = fs::key_from_path(&path).is_some_and(|key| key.starts_with(prefix));
            if matches && fs::remove(&path).await? {
                removed += 1;
            }
        }
        debug!(prefix, removed, "deleted cache entries");
        Ok(removed)
    }
}
