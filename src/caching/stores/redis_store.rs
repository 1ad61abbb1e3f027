//! # Redis Cache Store
//!
//! Shared cache for multi-instance deployments. Uses a `ConnectionManager`, which reconnects
//! on its own, so each operation just clones the handle.

use super::{is_pattern, CacheBackend};
use crate::caching::CacheResult;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix for all cache entries
    pub key_prefix: String,

    /// Number of keys requested per SCAN round trip
    pub scan_batch: usize,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: String::new(),
            scan_batch: 200,
        }
    }
}

/// Redis cache implementation
#[derive(Clone)]
pub struct RedisCache {
    config: RedisCacheConfig,
    connection: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis. Fails if the server cannot be reached.
    pub async fn new(config: RedisCacheConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        info!(url = %config.url, "Redis cache connected");

        Ok(Self { config, connection })
    }

    /// Shared connection handle, reused by the rate limiter's counters
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let full_pattern = self.full_key(pattern);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(self.config.scan_batch)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.full_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.full_key(key), value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(self.full_key(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        if !is_pattern(pattern) {
            return Ok(u64::from(self.delete(pattern).await?));
        }

        let keys = self.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(&keys).await?;
        debug!(pattern, removed, "Deleted Redis keys by pattern");
        Ok(removed)
    }

    async fn count(&self, pattern: &str) -> CacheResult<u64> {
        Ok(self.scan_keys(pattern).await?.len() as u64)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
