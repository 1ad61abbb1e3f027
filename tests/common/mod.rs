//! Shared fixtures for the integration tests

#![allow(dead_code)]

use axum::http::{header, HeaderValue};
use axum_test::TestServer;
use health_gateway::caching::CacheStore;
use health_gateway::core::config::{default_services, Environment};
use health_gateway::{build_router, GatewayConfig, ServerState};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::time::Duration;

pub const SECRET: &str = "integration-secret";

/// Default service table with every backend pointed at `base_url`
pub fn config_for(base_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.environment = Environment::Test;
    config.server.health_check_interval = Duration::ZERO;
    config.services = default_services();
    for service in config.services.values_mut() {
        service.url = base_url.to_string();
        service.timeout = Duration::from_secs(2);
    }
    config.auth.jwt_secret = Some(SECRET.to_string());
    config.dashboard.service_timeout = Duration::from_secs(2);
    config.dashboard.health_timeout = Duration::from_secs(1);
    config.dashboard.gateway_secret = "internal-secret".to_string();
    config
}

pub fn state_for(config: GatewayConfig) -> ServerState {
    ServerState::new(config, CacheStore::memory(), None).expect("state builds")
}

pub fn server_for(state: ServerState) -> TestServer {
    TestServer::new(build_router(state)).expect("test server starts")
}

/// Signed access token for `role`
pub fn token(user_id: &str, role: &str, doctor_id: Option<&str>) -> String {
    let mut claims = json!({
        "id": user_id,
        "username": format!("{}-user", user_id),
        "role": role,
        "authorities": [format!("ROLE_{}", role)],
        "exp": chrono::Utc::now().timestamp() + 3600,
        "iat": chrono::Utc::now().timestamp(),
    });
    if let Some(doctor_id) = doctor_id {
        claims["doctorId"] = json!(doctor_id);
    }
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token encodes")
}

pub fn bearer(token: &str) -> (header::HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).expect("valid header"),
    )
}
