//! # Caching System Module
//!
//! JSON cache used by the admin dashboard, addressed by namespaced keys such as
//! `admin:stats:v1` or `admin:doctors:top:10`.
//!
//! ## Architecture
//! 1. **Cache Stores**: raw string backends ([`InMemoryCache`], [`RedisCache`]) behind the
//!    [`CacheBackend`] trait
//! 2. **Cache Store facade**: [`CacheStore`] adds JSON (de)serialization, per-operation
//!    timeouts, hit/miss accounting and degraded-mode handling
//!
//! ## Degraded mode
//! A store built with [`CacheStore::disabled`] (or whose Redis connection failed at startup)
//! answers every read with a miss and accepts every write. Errors from a *connected* store are
//! logged and treated as misses on read; on write they are returned unless the store reports
//! itself unavailable.
//!
//! ## Usage Example
//! ```rust,no_run
//! # async fn demo() -> Result<(), health_gateway::caching::CacheError> {
//! use health_gateway::caching::CacheStore;
//! use std::time::Duration;
//!
//! let cache = CacheStore::memory();
//! cache.set_json("admin:stats:v1", &serde_json::json!({"totalPatients": 3}), Duration::from_secs(30)).await?;
//! let cached: Option<serde_json::Value> = cache.get_json("admin:stats:v1").await;
//! let deleted = cache.delete_pattern("admin:*").await?;
//! # Ok(()) }
//! ```

pub mod stores;

pub use stores::{CacheBackend, InMemoryCache, RedisCache, RedisCacheConfig};

use crate::core::config::CacheSettings;
use crate::core::error::GatewayError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}

impl CacheError {
    /// Whether the failure means the store cannot be reached (as opposed to rejecting the operation)
    pub fn is_unavailable(&self) -> bool {
        match self {
            CacheError::Timeout | CacheError::Unavailable => true,
            CacheError::Redis(e) => {
                e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
                    || e.is_io_error()
            }
            CacheError::Store { .. } | CacheError::Serialization(_) => false,
        }
    }
}

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        GatewayError::Cache {
            message: err.to_string(),
        }
    }
}

/// JSON cache facade over an optional backend
#[derive(Clone)]
pub struct CacheStore {
    backend: Option<Arc<dyn CacheBackend>>,
    redis: Option<RedisCache>,
    operation_timeout: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CacheStore {
    /// Wrap an arbitrary backend
    pub fn new(backend: Arc<dyn CacheBackend>, operation_timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            redis: None,
            operation_timeout,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// No-op store: every read misses, every write succeeds
    pub fn disabled() -> Self {
        Self {
            backend: None,
            redis: None,
            operation_timeout: Duration::from_secs(2),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// In-process store
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemoryCache::default()), Duration::from_secs(2))
    }

    /// Build the store described by the settings.
    ///
    /// No Redis URL gives an in-process store. A configured Redis that cannot be reached
    /// gives a disabled store, so the gateway still starts.
    pub async fn connect(settings: &CacheSettings) -> Self {
        let Some(url) = settings.redis_url.as_deref() else {
            info!("No Redis URL configured, using in-memory cache");
            let mut store = Self::memory();
            store.operation_timeout = settings.operation_timeout;
            return store;
        };

        let config = RedisCacheConfig {
            url: url.to_string(),
            key_prefix: settings.key_prefix.clone(),
            ..Default::default()
        };

        match tokio::time::timeout(settings.operation_timeout, RedisCache::new(config)).await {
            Ok(Ok(redis)) => {
                let mut store = Self::new(Arc::new(redis.clone()), settings.operation_timeout);
                store.redis = Some(redis);
                store
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Redis unavailable, caching disabled");
                Self::disabled()
            }
            Err(_) => {
                warn!("Redis connection timed out, caching disabled");
                Self::disabled()
            }
        }
    }

    /// Backend label: `redis`, `memory` or `disabled`
    pub fn kind(&self) -> &'static str {
        self.backend.as_ref().map(|b| b.kind()).unwrap_or("disabled")
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Connected Redis cache, if that is the active backend
    pub fn redis(&self) -> Option<&RedisCache> {
        self.redis.as_ref()
    }

    async fn bounded<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout)?
    }

    /// Read and decode a value. Errors and undecodable entries count as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;

        let raw = match self.bounded(backend.get(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        };

        let decoded = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Cached value is not valid JSON, treating as miss");
                None
            }
        });

        if decoded.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache miss");
        }
        decoded
    }

    /// Encode and write a value with a TTL
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };

        let encoded = serde_json::to_string(value)?;
        match self.bounded(backend.set(key, &encoded, ttl)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_unavailable() => {
                warn!(key, error = %e, "Cache unavailable, skipping write");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete one key
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self.backend.as_ref() {
            Some(backend) => self.bounded(backend.delete(key)).await,
            None => Ok(false),
        }
    }

    /// Delete every key matching a glob pattern and return how many went away
    pub async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(0);
        };

        let deleted = self.bounded(backend.delete_pattern(pattern)).await?;
        info!(pattern, deleted, "Cache keys invalidated");
        Ok(deleted)
    }

    /// Count keys matching a glob pattern
    pub async fn count(&self, pattern: &str) -> CacheResult<u64> {
        match self.backend.as_ref() {
            Some(backend) => self.bounded(backend.count(pattern)).await,
            None => Ok(0),
        }
    }

    /// Whether the backend answers right now
    pub async fn is_connected(&self) -> bool {
        match self.backend.as_ref() {
            Some(backend) => self.bounded(backend.health_check()).await.unwrap_or(false),
            None => false,
        }
    }

    /// `{backend, connected, totalKeys, adminKeys, hits, misses}`
    pub async fn stats(&self) -> Value {
        let connected = self.is_connected().await;
        let (total, admin) = if connected {
            (
                self.count("*").await.unwrap_or(0),
                self.count("admin:*").await.unwrap_or(0),
            )
        } else {
            (0, 0)
        };

        json!({
            "backend": self.kind(),
            "connected": connected,
            "totalKeys": total,
            "adminKeys": admin,
            "hits": self.hits.load(Ordering::Relaxed),
            "misses": self.misses.load(Ordering::Relaxed),
        })
    }
}
