//! # Reverse Proxy Integration Tests
//!
//! Requests go through the full router (auth, rate limiting, proxy) to wiremock backends.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_string, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bearer, config_for, server_for, state_for, token};
use health_gateway::protocols::http::MAX_BODY_BYTES;

#[tokio::test]
async fn test_path_rewrite_and_gateway_headers() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/doctors/42"))
        .and(query_param("include", "schedule"))
        .and(header("x-gateway-name", "Smart Health API Gateway"))
        .and(header("x-request-id", "trace-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let response = server
        .get("/v1/doctors/42")
        .add_query_param("include", "schedule")
        .add_header(HeaderName::from_static("x-request-id"), HeaderValue::from_static("trace-1"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["id"], 42);
    assert_eq!(response.header("x-request-id"), "trace-1");
    assert!(response.header("x-response-time").to_str().unwrap().ends_with("ms"));
}

#[tokio::test]
async fn test_alias_and_public_paths_reach_same_backend() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/doctors/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    assert_eq!(server.get("/v1/doctor/search").await.status_code(), StatusCode::OK);
    assert_eq!(server.get("/v1/public/doctors/search").await.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_identity_headers_injected_for_doctor() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/appointments/mine"))
        .and(header("x-user-id", "7"))
        .and(header("x-user-role", "DOCTOR"))
        .and(header("x-doctor-id", "d-99"))
        .and(header("x-user-authorities", r#"["ROLE_DOCTOR"]"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let (name, value) = bearer(&token("7", "DOCTOR", Some("d-99")));
    let response = server.get("/v1/appointments/mine").add_header(name, value).await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_spoofed_identity_headers_are_stripped() {
    let backend = MockServer::start().await;
    Mock::given(header_exists("x-user-id"))
        .respond_with(ResponseTemplate::new(418))
        .expect(0)
        .mount(&backend)
        .await;
    Mock::given(header_exists("x-user-role"))
        .respond_with(ResponseTemplate::new(418))
        .expect(0)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/patients/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let response = server
        .get("/v1/patients/me")
        .add_header(HeaderName::from_static("x-user-id"), HeaderValue::from_static("1"))
        .add_header(HeaderName::from_static("x-user-role"), HeaderValue::from_static("ADMIN"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_json_body_forwarded_compactly() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_string(r#"{"password":"pw","username":"alice"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t"})))
        .expect(1)
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let response = server
        .post("/v1/auth/login")
        .text("{\n  \"password\": \"pw\",\n  \"username\": \"alice\"\n}")
        .content_type("application/json")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_token_rejected_on_service_route_only() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let (name, value) = bearer("not-a-jwt");

    let rejected = server
        .get("/v1/doctors/1")
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(rejected.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(rejected.json::<Value>()["type"], "UNAUTHORIZED");

    let allowed = server.post("/v1/auth/refresh-token").add_header(name, value).await;
    assert_eq!(allowed.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_upstream_client_errors_relayed_verbatim() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/patients/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "no such patient"})))
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let response = server.get("/v1/patients/404").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["message"], "no such patient");
}

#[tokio::test]
async fn test_breaker_opens_after_threshold_and_short_circuits() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/doctors/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&backend)
        .await;

    let mut config = config_for(&backend.uri());
    config.circuit_breaker.defaults.failure_threshold = 5;
    config.circuit_breaker.defaults.recovery_timeout = Duration::from_secs(60);
    let state = state_for(config);
    let server = server_for(state.clone());

    for _ in 0..5 {
        let response = server.get("/v1/doctors/flaky").await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let rejected = server.get("/v1/doctors/flaky").await;
    assert_eq!(rejected.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body = rejected.json::<Value>();
    assert_eq!(body["type"], "CIRCUIT_OPEN");
    assert_eq!(body["service"], "doctors");

    let snapshot = state.breakers.get("doctors").unwrap().snapshot();
    assert_eq!(snapshot.state, "OPEN");
    assert_eq!(snapshot.rejected_calls, 1);
    assert!(!state.registry.get("doctors").unwrap().is_healthy());
}

#[tokio::test]
async fn test_breaker_recovers_after_successful_trial() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/billing/invoices"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/billing/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&backend)
        .await;

    let mut config = config_for(&backend.uri());
    config.services.get_mut("billing").unwrap().base_path = "/api/billing".into();
    config.circuit_breaker.defaults.failure_threshold = 2;
    config.circuit_breaker.defaults.recovery_timeout = Duration::from_millis(100);
    let state = state_for(config);
    let server = server_for(state.clone());

    server.get("/v1/billing/invoices").await;
    server.get("/v1/billing/invoices").await;
    assert_eq!(
        server.get("/v1/billing/invoices").await.status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(server.get("/v1/billing/invoices").await.status_code(), StatusCode::OK);
    assert_eq!(state.breakers.get("billing").unwrap().snapshot().state, "CLOSED");
}

#[tokio::test]
async fn test_oversized_body_is_rejected_without_consuming_trial() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/billing/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&backend)
        .await;

    let mut config = config_for(&backend.uri());
    config.services.get_mut("billing").unwrap().base_path = "/api/billing".into();
    config.circuit_breaker.defaults.failure_threshold = 1;
    config.circuit_breaker.defaults.recovery_timeout = Duration::from_millis(100);
    let state = state_for(config);
    state.breakers.get_or_create("billing").on_failure();
    let server = server_for(state.clone());

    tokio::time::sleep(Duration::from_millis(150)).await;

    let oversized = bytes::Bytes::from(vec![b'x'; MAX_BODY_BYTES + 1]);
    let response = server.post("/v1/billing/invoices").bytes(oversized).await;
    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.json::<Value>()["type"], "PAYLOAD_TOO_LARGE");
    assert_eq!(state.breakers.get("billing").unwrap().snapshot().state, "OPEN");

    assert_eq!(server.get("/v1/billing/invoices").await.status_code(), StatusCode::OK);
    assert_eq!(state.breakers.get("billing").unwrap().snapshot().state, "CLOSED");
}

#[tokio::test]
async fn test_unreachable_backend_is_service_unavailable() {
    // Bind then drop a listener so the port is closed
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = server_for(state_for(config_for(&format!("http://{}", addr))));
    let response = server.get("/v1/medicine/stock").await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body = response.json::<Value>();
    assert_eq!(body["type"], "SERVICE_UNAVAILABLE");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/predict"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&backend)
        .await;

    let mut config = config_for(&backend.uri());
    config.services.get_mut("prediction").unwrap().timeout = Duration::from_millis(200);
    let server = server_for(state_for(config));

    let response = server.get("/v1/prediction/predict").await;
    assert_eq!(response.status_code(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.json::<Value>()["type"], "TIMEOUT");
}

#[tokio::test]
async fn test_unknown_service_is_404() {
    let backend = MockServer::start().await;
    let server = server_for(state_for(config_for(&backend.uri())));

    let response = server.get("/v1/pharmacy/orders").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["type"], "UNKNOWN_SERVICE");
}
