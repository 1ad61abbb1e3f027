//! # Rate Limiting System
//!
//! Fixed-window request budgets keyed by client. Every request is assigned to exactly one
//! tier:
//!
//! | tier       | budget                | applies to                                   |
//! |------------|-----------------------|----------------------------------------------|
//! | `auth`     | 5 per 15 min          | `/v1/auth/login`, `/v1/auth/refresh-token`   |
//! | `register` | 3 per hour, by IP     | `/v1/auth/register`                          |
//! | `admin`    | 2 × max               | ADMIN callers (production only)              |
//! | `doctor`   | 1.5 × max             | DOCTOR callers                               |
//! | `standard` | max                   | everyone else                                |
//!
//! Health endpoints are never limited, and neither are ADMIN callers outside production.
//!
//! ## Architecture
//! - `RateLimitStorage`: counter backend (Redis `INCR` + `PEXPIRE`, or a local `DashMap`)
//! - `RateLimiter`: one long-lived instance per tier; falls back to local counters when the
//!   shared store errors or does not answer within `store_timeout`
//! - `TieredRateLimiter`: picks the tier and the client key for a request
//! - `rate_limit_middleware`: the axum layer
//!
//! ## Usage Example
//! ```rust,no_run
//! # async fn demo() -> Result<(), health_gateway::core::error::GatewayError> {
//! use health_gateway::core::config::{Environment, RateLimitSettings};
//! use health_gateway::middleware::rate_limiting::TieredRateLimiter;
//!
//! let limiter = TieredRateLimiter::new(&RateLimitSettings::default(), Environment::Production, None);
//! if let Some((tier, key)) = limiter.select("/v1/doctors", "10.0.0.1", None) {
//!     let decision = tier.check(&key).await?;
//!     println!("{} requests left", decision.remaining);
//! }
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::config::{Environment, RateLimitSettings};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{client_ip, AuthContext};
use crate::observability::metrics::record_rate_limited;

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Errors that can occur during rate limiting operations
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<RateLimitError> for GatewayError {
    fn from(err: RateLimitError) -> Self {
        GatewayError::internal(format!("Rate limit storage: {}", err))
    }
}

/// Counter value after an increment, with the time left in the current window
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    pub count: u64,
    pub resets_in: Duration,
}

/// Storage backend for fixed-window counters
#[async_trait]
pub trait RateLimitStorage: Send + Sync {
    /// Increment `key`, starting a new window of length `window` on the first hit
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError>;
    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;
}

/// In-memory storage implementation
#[derive(Default)]
pub struct InMemoryStorage {
    data: DashMap<String, (u64, Instant)>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows that have already ended, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, (_, expiry)| *expiry > now);
        before.saturating_sub(self.data.len())
    }

    /// Number of live or not-yet-purged windows
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Purge ended windows every `every` until the storage is dropped.
    ///
    /// Returns `None` outside a tokio runtime, where purging only happens on reuse of a key.
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            return None;
        }
        let storage: Weak<Self> = Arc::downgrade(self);
        tokio::runtime::Handle::try_current().ok().map(|handle| {
            handle.spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(storage) = storage.upgrade() else { break };
                    let removed = storage.purge_expired();
                    if removed > 0 {
                        debug!(removed, "Purged ended rate limit windows");
                    }
                }
            })
        })
    }
}

#[async_trait]
impl RateLimitStorage for InMemoryStorage {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        let now = Instant::now();
        let mut entry = self
            .data
            .entry(key.to_string())
            .and_modify(|(count, expiry)| {
                if *expiry > now {
                    *count += 1;
                } else {
                    *count = 1;
                    *expiry = now + window;
                }
            })
            .or_insert((1, now + window));

        let (count, expiry) = *entry.value_mut();
        Ok(WindowCount {
            count,
            resets_in: expiry.saturating_duration_since(now),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.data.remove(key);
        Ok(())
    }
}

/// Redis storage implementation
pub struct RedisStorage {
    connection: ConnectionManager,
}

impl RedisStorage {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl RateLimitStorage for RedisStorage {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        let mut conn = self.connection.clone();
        let (count, ttl_ms): (u64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .pttl(key)
            .query_async(&mut conn)
            .await?;

        // A key without a TTL never resets; set it on the first hit and whenever it went missing
        let resets_in = if ttl_ms > 0 {
            Duration::from_millis(ttl_ms as u64)
        } else {
            let window_ms = window.as_millis().max(1) as u64;
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(window_ms)
                .query_async::<_, ()>(&mut conn)
                .await?;
            window
        };
        Ok(WindowCount { count, resets_in })
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// Request budget tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    Auth,
    Register,
    Standard,
    Doctor,
    Admin,
}

impl RateLimitTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitTier::Auth => "auth",
            RateLimitTier::Register => "register",
            RateLimitTier::Standard => "standard",
            RateLimitTier::Doctor => "doctor",
            RateLimitTier::Admin => "admin",
        }
    }
}

/// Result of an allowed check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub limit: u64,
    pub remaining: u64,
    pub resets_in: Duration,
}

/// Fixed-window limiter for a single tier
pub struct RateLimiter {
    tier: RateLimitTier,
    limit: u64,
    window: Duration,
    key_prefix: String,
    shared: Option<Arc<dyn RateLimitStorage>>,
    store_timeout: Duration,
    local: Arc<InMemoryStorage>,
}

impl RateLimiter {
    pub fn new(
        tier: RateLimitTier,
        limit: u64,
        window: Duration,
        key_prefix: impl Into<String>,
        shared: Option<Arc<dyn RateLimitStorage>>,
        local: Arc<InMemoryStorage>,
    ) -> Self {
        Self {
            tier,
            limit,
            window,
            key_prefix: key_prefix.into(),
            shared,
            store_timeout: RateLimitSettings::default().store_timeout,
            local,
        }
    }

    /// Bound every shared-store round trip by `timeout`
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn tier(&self) -> RateLimitTier {
        self.tier
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn storage_key(&self, client_key: &str) -> String {
        format!("{}{}:{}", self.key_prefix, self.tier.as_str(), client_key)
    }

    async fn count(&self, key: &str) -> Result<WindowCount, RateLimitError> {
        if let Some(shared) = &self.shared {
            let attempt = tokio::time::timeout(self.store_timeout, shared.increment(key, self.window))
                .await
                .unwrap_or(Err(RateLimitError::Timeout(self.store_timeout)));
            match attempt {
                Ok(count) => return Ok(count),
                Err(e) => {
                    warn!(tier = self.tier.as_str(), error = %e, "Shared rate limit store failed, using local counters");
                }
            }
        }
        self.local.increment(key, self.window).await
    }

    /// Count one request against `client_key`
    pub async fn check(&self, client_key: &str) -> GatewayResult<RateLimitDecision> {
        let key = self.storage_key(client_key);
        let window = self.count(&key).await?;

        if window.count > self.limit {
            let retry_after_secs = window.resets_in.as_secs_f64().ceil().max(1.0) as u64;
            record_rate_limited(self.tier.as_str());
            warn!(
                target: "security",
                tier = self.tier.as_str(),
                client = client_key,
                limit = self.limit,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(GatewayError::RateLimitExceeded {
                limit: self.limit,
                retry_after_secs,
                tier: self.tier.as_str().to_string(),
            });
        }

        Ok(RateLimitDecision {
            limit: self.limit,
            remaining: self.limit - window.count,
            resets_in: window.resets_in,
        })
    }
}

/// Role- and route-aware dispatcher over the five tiers
pub struct TieredRateLimiter {
    enabled: bool,
    environment: Environment,
    auth: RateLimiter,
    register: RateLimiter,
    standard: RateLimiter,
    doctor: RateLimiter,
    admin: RateLimiter,
    local: Arc<InMemoryStorage>,
    _cleanup_task: Option<JoinHandle<()>>,
}

impl TieredRateLimiter {
    /// Build all tiers. `shared` is the Redis connection when one is available.
    pub fn new(
        settings: &RateLimitSettings,
        environment: Environment,
        shared: Option<ConnectionManager>,
    ) -> Self {
        let shared =
            shared.map(|conn| Arc::new(RedisStorage::new(conn)) as Arc<dyn RateLimitStorage>);
        Self::with_storage(settings, environment, shared)
    }

    /// Build all tiers over an arbitrary shared store
    pub fn with_storage(
        settings: &RateLimitSettings,
        environment: Environment,
        shared: Option<Arc<dyn RateLimitStorage>>,
    ) -> Self {
        let local = Arc::new(InMemoryStorage::new());
        let cleanup_task = local.spawn_cleanup(settings.cleanup_interval);
        let max = settings.max_requests;
        let build = |tier, limit, window| {
            RateLimiter::new(
                tier,
                limit,
                window,
                settings.key_prefix.clone(),
                shared.clone(),
                Arc::clone(&local),
            )
            .with_store_timeout(settings.store_timeout)
        };

        Self {
            enabled: settings.enabled,
            environment,
            auth: build(RateLimitTier::Auth, 5, Duration::from_secs(15 * 60)),
            register: build(RateLimitTier::Register, 3, Duration::from_secs(60 * 60)),
            standard: build(RateLimitTier::Standard, max, settings.window),
            doctor: build(RateLimitTier::Doctor, max * 3 / 2, settings.window),
            admin: build(RateLimitTier::Admin, max * 2, settings.window),
            local,
            _cleanup_task: cleanup_task,
        }
    }

    /// Process-local counters shared by every tier
    pub fn local_counters(&self) -> &Arc<InMemoryStorage> {
        &self.local
    }

    /// Whether the request bypasses every tier
    pub fn is_exempt(&self, path: &str, auth: Option<&AuthContext>) -> bool {
        if !self.enabled {
            return true;
        }
        if path == "/health" || path.starts_with("/health/") || path == "/api/health" {
            return true;
        }
        !self.environment.is_production() && auth.map(AuthContext::is_admin).unwrap_or(false)
    }

    /// Pick the tier and client key for a request, or `None` when exempt
    pub fn select(
        &self,
        path: &str,
        ip: &str,
        auth: Option<&AuthContext>,
    ) -> Option<(&RateLimiter, String)> {
        if self.is_exempt(path, auth) {
            return None;
        }

        let user = auth.map(|a| a.user_id.as_str()).unwrap_or("anonymous");
        let client_key = format!("{}:{}", ip, user);

        let path = path.trim_end_matches('/');
        let choice = match path {
            "/v1/auth/login" | "/v1/auth/refresh-token" => (&self.auth, client_key),
            "/v1/auth/register" => (&self.register, ip.to_string()),
            _ => match auth {
                Some(a) if a.is_admin() => (&self.admin, client_key),
                Some(a) if a.is_doctor() => (&self.doctor, client_key),
                _ => (&self.standard, client_key),
            },
        };
        Some(choice)
    }

    /// Tier summary for the detailed health endpoint
    pub fn describe(&self) -> serde_json::Value {
        let tier = |l: &RateLimiter| {
            serde_json::json!({
                "limit": l.limit(),
                "windowSeconds": l.window().as_secs(),
            })
        };
        serde_json::json!({
            "enabled": self.enabled,
            "adminExempt": !self.environment.is_production(),
            "auth": tier(&self.auth),
            "register": tier(&self.register),
            "standard": tier(&self.standard),
            "doctor": tier(&self.doctor),
            "admin": tier(&self.admin),
        })
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Axum middleware: count the request against its tier, reject with 429 when over budget
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<TieredRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    let auth = request.extensions().get::<AuthContext>().cloned();

    let Some((tier, key)) = limiter.select(request.uri().path(), &ip, auth.as_ref()) else {
        return next.run(request).await;
    };

    match tier.check(&key).await {
        Ok(decision) => {
            debug!(tier = tier.tier().as_str(), remaining = decision.remaining, "Rate limit check passed");
            let mut response = next.run(request).await;
            set_header(response.headers_mut(), LIMIT_HEADER, decision.limit);
            set_header(response.headers_mut(), REMAINING_HEADER, decision.remaining);
            response
        }
        Err(err) => {
            let limit = match &err {
                GatewayError::RateLimitExceeded { limit, .. } => Some(*limit),
                _ => None,
            };
            let mut response = err.into_response();
            if let Some(limit) = limit {
                set_header(response.headers_mut(), LIMIT_HEADER, limit);
                set_header(response.headers_mut(), REMAINING_HEADER, 0);
            }
            response
        }
    }
}
