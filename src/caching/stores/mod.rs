//! # Cache Backends
//!
//! Raw string key/value backends behind the [`CacheStore`](crate::caching::CacheStore)
//! facade: an in-process map for single-instance deployments and tests, and Redis for
//! anything that runs more than one gateway.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::{CacheError, CacheResult};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

/// Trait for cache backend implementations
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short label for stats output (`memory`, `redis`)
    fn kind(&self) -> &'static str;

    /// Get a value from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Delete a single key, returning whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key matching a glob pattern (`admin:*`), returning how many were removed
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Count keys matching a glob pattern
    async fn count(&self, pattern: &str) -> CacheResult<u64>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}

/// Whether `pattern` contains glob metacharacters
pub fn is_pattern(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Compile a Redis-style glob (`*`, `?`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| CacheError::Store {
        message: format!("invalid pattern '{}': {}", pattern, e),
    })
}
