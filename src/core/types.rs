//! # Core Types
//!
//! Request-scoped values shared by the middleware, the proxy and the admin handlers. They
//! travel through axum request extensions: middleware inserts them, handlers read them back
//! with `Extension<T>` or `request.extensions().get::<T>()`.

use axum::http::HeaderMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const GATEWAY_NAME_HEADER: &str = "x-gateway-name";
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Correlation id for one inbound request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new id of the form `req_{unix_millis}_{9 lowercase alphanumerics}`
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|c| (c as char).to_ascii_lowercase())
            .collect();
        Self(format!(
            "req_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            suffix
        ))
    }

    /// Reuse the caller's `X-Request-ID` if present, otherwise generate one
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform roles that change gateway behavior
pub mod roles {
    pub const ADMIN: &str = "ADMIN";
    pub const DOCTOR: &str = "DOCTOR";
}

/// Decoded identity of an authenticated caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub username: Option<String>,
    pub role: String,
    pub authorities: Vec<String>,
    /// Doctor profile id, only carried by DOCTOR tokens
    pub doctor_id: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(roles::ADMIN)
    }

    pub fn is_doctor(&self) -> bool {
        self.has_role(roles::DOCTOR)
    }
}

/// Best-effort client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|v| v.parse::<IpAddr>().ok());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| peer.map(|p| p.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generated_request_id_shape() {
        let id = RequestId::generate();
        let parts: Vec<_> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "req");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_request_id_reused_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(RequestId::from_headers(&headers).as_str(), "abc-123");
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.7, 172.16.0.1"));
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.7");
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "127.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }
}
