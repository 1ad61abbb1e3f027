//! # In-Memory Cache Store
//!
//! `DashMap`-backed store with lazy expiry on read plus a periodic sweep. Used when no Redis
//! URL is configured and throughout the test suite.

use super::{glob_to_regex, is_pattern, CacheBackend};
use crate::caching::CacheResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    entries: Arc<DashMap<String, MemoryEntry>>,
    expired_cleanups: Arc<AtomicU64>,
    _cleanup_task: Option<tokio::task::JoinHandle<()>>,
}

impl InMemoryCache {
    /// Create a store that sweeps expired entries every `cleanup_interval`.
    ///
    /// The sweep task is only spawned when called from inside a tokio runtime; outside
    /// one, expiry stays lazy.
    pub fn new(cleanup_interval: Duration) -> Self {
        let entries = Arc::new(DashMap::new());
        let expired_cleanups = Arc::new(AtomicU64::new(0));

        let cleanup_task = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let entries = Arc::clone(&entries);
            let expired_cleanups = Arc::clone(&expired_cleanups);
            handle.spawn(async move {
                let mut ticker = interval(cleanup_interval);
                loop {
                    ticker.tick().await;
                    let removed = Self::sweep(&entries);
                    if removed > 0 {
                        expired_cleanups.fetch_add(removed, Ordering::Relaxed);
                        debug!(removed, "Swept expired in-memory cache entries");
                    }
                }
            })
        });

        Self {
            entries,
            expired_cleanups,
            _cleanup_task: cleanup_task,
        }
    }

    fn sweep(entries: &DashMap<String, MemoryEntry>) -> u64 {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(entries.len()) as u64
    }

    /// Number of entries removed by the background sweep so far
    pub fn expired_cleanups(&self) -> u64 {
        self.expired_cleanups.load(Ordering::Relaxed)
    }

    fn live_keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let re = glob_to_regex(pattern)?;
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now) && re.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        if let Some(task) = self._cleanup_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone());

        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| !entry.is_expired(now))
            .unwrap_or(false))
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        if !is_pattern(pattern) {
            return Ok(u64::from(self.delete(pattern).await?));
        }

        let keys = self.live_keys_matching(pattern)?;
        let mut deleted = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn count(&self, pattern: &str) -> CacheResult<u64> {
        Ok(self.live_keys_matching(pattern)?.len() as u64)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }
}
