//! # Rate Limiting Tests
//!
//! Tier selection and enforcement through the full router.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bearer, config_for, server_for, state_for, token};
use health_gateway::core::config::Environment;

async fn ok_backend() -> MockServer {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&backend)
        .await;
    backend
}

#[tokio::test]
async fn test_standard_tier_rejects_request_over_budget() {
    let backend = ok_backend().await;
    let mut config = config_for(&backend.uri());
    config.rate_limit.max_requests = 3;
    config.rate_limit.window = Duration::from_secs(60);
    let server = server_for(state_for(config));

    for remaining in ["2", "1", "0"] {
        let response = server.get("/v1/doctors/list").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.header("x-ratelimit-limit"), "3");
        assert_eq!(response.header("x-ratelimit-remaining"), remaining);
    }

    let limited = server.get("/v1/doctors/list").await;
    assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.header("x-ratelimit-remaining"), "0");

    let retry_after: u64 = limited.header("retry-after").to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = limited.json::<Value>();
    assert_eq!(body["type"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["retryAfter"], retry_after);
}

#[tokio::test]
async fn test_health_endpoints_never_limited() {
    let backend = ok_backend().await;
    let mut config = config_for(&backend.uri());
    config.rate_limit.max_requests = 1;
    let server = server_for(state_for(config));

    for _ in 0..5 {
        assert_eq!(server.get("/health").await.status_code(), StatusCode::OK);
        assert_eq!(server.get("/api/health").await.status_code(), StatusCode::OK);
        assert_eq!(server.get("/health/detailed").await.status_code(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_login_tier_allows_five_attempts() {
    let backend = ok_backend().await;
    let server = server_for(state_for(config_for(&backend.uri())));

    for _ in 0..5 {
        assert_eq!(server.post("/v1/auth/login").await.status_code(), StatusCode::OK);
    }
    let limited = server.post("/v1/auth/login").await;
    assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.header("x-ratelimit-limit"), "5");
}

#[tokio::test]
async fn test_register_tier_is_keyed_by_ip() {
    let backend = ok_backend().await;
    let server = server_for(state_for(config_for(&backend.uri())));
    let forwarded = |ip: &'static str| (HeaderName::from_static("x-forwarded-for"), HeaderValue::from_static(ip));

    for _ in 0..3 {
        let (name, value) = forwarded("10.1.1.1");
        assert_eq!(
            server.post("/v1/auth/register").add_header(name, value).await.status_code(),
            StatusCode::OK
        );
    }

    let (name, value) = forwarded("10.1.1.1");
    assert_eq!(
        server.post("/v1/auth/register").add_header(name, value).await.status_code(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let (name, value) = forwarded("10.2.2.2");
    assert_eq!(
        server.post("/v1/auth/register").add_header(name, value).await.status_code(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_doctor_tier_gets_larger_budget() {
    let backend = ok_backend().await;
    let mut config = config_for(&backend.uri());
    config.rate_limit.max_requests = 2;
    let server = server_for(state_for(config));
    let (name, value) = bearer(&token("5", "DOCTOR", Some("d-5")));

    let response = server
        .get("/v1/appointments/today")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("x-ratelimit-limit"), "3");
}

#[tokio::test]
async fn test_admin_exempt_outside_production_only() {
    let backend = ok_backend().await;

    let mut config = config_for(&backend.uri());
    config.rate_limit.max_requests = 1;
    let server = server_for(state_for(config));
    let (name, value) = bearer(&token("1", "ADMIN", None));
    for _ in 0..4 {
        let response = server
            .get("/v1/patients/all")
            .add_header(name.clone(), value.clone())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let mut config = config_for(&backend.uri());
    config.rate_limit.max_requests = 1;
    config.server.environment = Environment::Production;
    let server = server_for(state_for(config));
    for expected in [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS] {
        let response = server
            .get("/v1/patients/all")
            .add_header(name.clone(), value.clone())
            .await;
        assert_eq!(response.status_code(), expected);
    }
}
