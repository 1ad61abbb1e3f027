//! # Error Handling
//!
//! Every failure the gateway can hand back to a client is a variant of [`GatewayError`].
//! Subsystems keep their own `thiserror` enums (`CacheError`, `RateLimitError`) and convert
//! into this one at their boundary, so handlers only ever deal with one error type.
//!
//! ## Response shape
//!
//! `IntoResponse` renders every error as the same JSON envelope:
//!
//! ```json
//! {
//!   "success": false,
//!   "message": "Circuit breaker open for service: doctors",
//!   "code": 503,
//!   "type": "CIRCUIT_OPEN",
//!   "service": "doctors",
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! `retryAfter` is present on rate-limit errors. `stack` (the debug rendering of the error)
//! is present only when detail exposure was switched on at startup, which the server does
//! for every environment except production.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

/// Toggle inclusion of the `stack` field in error bodies.
///
/// Called once by the server from the configured environment.
pub fn set_expose_error_details(expose: bool) {
    EXPOSE_DETAILS.store(expose, Ordering::Relaxed);
}

/// Error taxonomy for the traffic-control layer
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Upstream refused the connection (or is otherwise unreachable)
    #[error("Service {service} is unavailable: {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// Upstream did not answer within its deadline
    #[error("Service {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    /// Any other transport failure talking to an upstream
    #[error("Gateway error from {service}: {message}")]
    Upstream { service: String, message: String },

    /// Client exhausted its request budget
    #[error("Too many requests, please try again later")]
    RateLimitExceeded {
        limit: u64,
        retry_after_secs: u64,
        tier: String,
    },

    /// Breaker for the service is open; no call was attempted
    #[error("Circuit breaker open for service: {service}")]
    CircuitOpen { service: String },

    /// Request body over the proxy's buffering limit
    #[error("Request body exceeds {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: usize },

    /// Route points at a service that was never registered
    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    /// Missing or invalid credentials
    #[error("Authentication failed: {reason}")]
    Unauthorized { reason: String },

    /// Authenticated, but not allowed
    #[error("Access denied: {reason}")]
    Forbidden { reason: String },

    /// Configuration-related errors (invalid config, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Cache store rejected an operation while connected
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(reason: S) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Create a service unavailable error
    pub fn service_unavailable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_service(service: impl Into<String>) -> Self {
        Self::UnknownService {
            service: service.into(),
        }
    }

    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnknownService { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cache { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Upstream { .. } => "GATEWAY_ERROR",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::UnknownService { .. } => "UNKNOWN_SERVICE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Cache { .. } => "CACHE_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Name of the upstream service this error originated from, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::ServiceUnavailable { service, .. }
            | Self::Timeout { service, .. }
            | Self::Upstream { service, .. }
            | Self::CircuitOpen { service }
            | Self::UnknownService { service } => Some(service),
            _ => None,
        }
    }

    /// Whether this outcome should count against the service's breaker and health
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. } | Self::Timeout { .. } | Self::Upstream { .. }
        )
    }

    /// Render the JSON body without building a full response
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("success".into(), json!(false));
        body.insert("message".into(), json!(self.to_string()));
        body.insert("code".into(), json!(self.status_code().as_u16()));
        body.insert("type".into(), json!(self.error_type()));
        if let Some(service) = self.service() {
            body.insert("service".into(), json!(service));
        }
        if let Self::RateLimitExceeded {
            retry_after_secs, ..
        } = self
        {
            body.insert("retryAfter".into(), json!(retry_after_secs));
        }
        body.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        if EXPOSE_DETAILS.load(Ordering::Relaxed) {
            body.insert("stack".into(), json!(format!("{:?}", self)));
        }
        Value::Object(body)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: format!("YAML error: {}", err),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for GatewayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        let reason = match err.kind() {
            ErrorKind::ExpiredSignature => "Access token has expired".to_string(),
            ErrorKind::ImmatureSignature => "Access token not active".to_string(),
            ErrorKind::InvalidToken | ErrorKind::InvalidSignature => {
                "Invalid access token".to_string()
            }
            _ => format!("Token verification failed: {}", err),
        };
        Self::Unauthorized { reason }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.to_body())).into_response();

        if let Self::RateLimitExceeded {
            retry_after_secs, ..
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::service_unavailable("doctors", "connection refused").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Timeout {
                service: "doctors".into(),
                timeout_ms: 5000
            }
            .status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            GatewayError::Upstream {
                service: "doctors".into(),
                message: "reset".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::RateLimitExceeded {
                limit: 100,
                retry_after_secs: 60,
                tier: "standard".into()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::circuit_open("doctors").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_body_carries_service_and_code() {
        let body = GatewayError::circuit_open("billing").to_body();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!(503));
        assert_eq!(body["type"], json!("CIRCUIT_OPEN"));
        assert_eq!(body["service"], json!("billing"));
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn test_rate_limit_body_has_retry_after() {
        let body = GatewayError::RateLimitExceeded {
            limit: 5,
            retry_after_secs: 42,
            tier: "auth".into(),
        }
        .to_body();
        assert_eq!(body["retryAfter"], json!(42));
        assert!(body.get("service").is_none());
    }

    #[test]
    fn test_upstream_failure_classification() {
        assert!(GatewayError::service_unavailable("a", "down").is_upstream_failure());
        assert!(!GatewayError::circuit_open("a").is_upstream_failure());
        assert!(!GatewayError::unauthorized("nope").is_upstream_failure());
    }
}
