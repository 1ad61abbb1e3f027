//! # Admin Dashboard Integration Tests
//!
//! Aggregation, caching, invalidation and the admin gate, against wiremock backends.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bearer, config_for, server_for, state_for, token};

async fn mount_stats(backend: &MockServer, route: &str, body: Value, hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("x-internal-request", "true"))
        .and(header("x-gateway-secret", "internal-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(hits)
        .mount(backend)
        .await;
}

fn admin() -> (axum::http::HeaderName, axum::http::HeaderValue) {
    bearer(&token("1", "ADMIN", None))
}

async fn fetch_stats(server: &TestServer) -> Value {
    let (name, value) = admin();
    server
        .get("/v1/admin/dashboard/stats")
        .add_header(name, value)
        .await
        .json::<Value>()["data"]
        .clone()
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let backend = MockServer::start().await;
    let server = server_for(state_for(config_for(&backend.uri())));

    let anonymous = server.get("/v1/admin/dashboard/stats").await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);

    let (name, value) = bearer(&token("2", "PATIENT", None));
    let patient = server.get("/v1/admin/dashboard/stats").add_header(name, value).await;
    assert_eq!(patient.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(patient.json::<Value>()["type"], "FORBIDDEN");
}

#[tokio::test]
async fn test_stats_partial_when_two_of_five_backends_fail() {
    let backend = MockServer::start().await;
    mount_stats(
        &backend,
        "/v1/admin/patients/stats",
        json!({"data": {"totalPatients": 120, "activePatients": 80, "newThisMonth": 9, "mostCommonGender": "FEMALE"}}),
        1,
    )
    .await;
    mount_stats(
        &backend,
        "/v1/admin/doctors/stats",
        json!({"data": {"totalDoctors": 14, "activeDoctors": 12, "onlineNow": 3}}),
        1,
    )
    .await;
    mount_stats(
        &backend,
        "/api/v1/admin/billing/revenue/stats",
        json!({"data": {"todayRevenue": 250.5, "monthRevenue": 9000, "yearRevenue": 120000}}),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v1/admin/appointments/stats"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/admin/medicines/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let (name, value) = admin();
    let response = server.get("/v1/admin/dashboard/stats").add_header(name, value).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert!(body["meta"]["requestId"].is_string());

    let data = &body["data"];
    assert_eq!(data["partial"], true);
    assert_eq!(data["fromCache"], false);
    assert_eq!(
        data["serviceStatus"],
        json!({"patients": true, "doctors": true, "appointments": false, "revenue": true, "medicine": false})
    );
    assert_eq!(data["totalPatients"], 120);
    assert_eq!(data["mostCommonGender"], "FEMALE");
    assert_eq!(data["onlineDoctors"], 3);
    assert_eq!(data["revenueToday"], 250.5);
    assert_eq!(data["todayAppointments"], 0);
    assert_eq!(data["mostCommonAppointmentType"], "N/A");
    assert_eq!(data["totalMedicines"], 0);
    assert_eq!(data["appointments"], Value::Null);
    assert_eq!(data["patients"]["totalPatients"], 120);
}

#[tokio::test]
async fn test_stats_served_from_cache_until_refreshed() {
    let backend = MockServer::start().await;
    for route in [
        "/v1/admin/patients/stats",
        "/v1/admin/doctors/stats",
        "/v1/admin/appointments/stats",
        "/api/v1/admin/billing/revenue/stats",
        "/v1/admin/medicines/stats",
    ] {
        // One call before the refresh, one after
        mount_stats(&backend, route, json!({"data": {}}), 2).await;
    }

    let state = state_for(config_for(&backend.uri()));
    let server = server_for(state.clone());
    let (name, value) = admin();

    let first = server
        .get("/v1/admin/dashboard/stats")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(first["data"]["fromCache"], false);
    assert_eq!(first["data"]["partial"], false);

    let second = server
        .get("/v1/admin/dashboard/stats")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(second["data"]["fromCache"], true);
    assert_eq!(second["data"]["timestamp"], first["data"]["timestamp"]);

    let refresh = server
        .post("/v1/admin/dashboard/refresh")
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(refresh.status_code(), StatusCode::OK);
    assert_eq!(refresh.json::<Value>()["data"]["deletedKeys"], 1);

    let again = server
        .post("/v1/admin/dashboard/refresh")
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(again.json::<Value>()["data"]["deletedKeys"], 0);

    let third = server
        .get("/v1/admin/dashboard/stats")
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(third["data"]["fromCache"], false);
}

#[tokio::test]
async fn test_stats_fan_out_again_after_ttl() {
    let backend = MockServer::start().await;
    for route in [
        "/v1/admin/patients/stats",
        "/v1/admin/doctors/stats",
        "/v1/admin/appointments/stats",
        "/api/v1/admin/billing/revenue/stats",
        "/v1/admin/medicines/stats",
    ] {
        mount_stats(&backend, route, json!({"data": {"totalPatients": 12}}), 2).await;
    }

    let mut config = config_for(&backend.uri());
    config.dashboard.stats_ttl = Duration::from_millis(150);
    let server = server_for(state_for(config));

    let mut first = fetch_stats(&server).await;
    let mut second = fetch_stats(&server).await;
    assert_eq!(first["fromCache"], false);
    assert_eq!(second["fromCache"], true);
    first.as_object_mut().unwrap().remove("fromCache");
    second.as_object_mut().unwrap().remove("fromCache");
    assert_eq!(first, second);

    tokio::time::sleep(Duration::from_millis(250)).await;

    let third = fetch_stats(&server).await;
    assert_eq!(third["fromCache"], false);
    assert_eq!(third["totalPatients"], 12);
}

#[tokio::test]
async fn test_revenue_analytics_cached_per_query_window() {
    let backend = MockServer::start().await;
    for route in [
        "/api/v1/admin/billing/revenue/stats",
        "/api/v1/admin/billing/revenue/distribution",
        "/api/v1/admin/billing/payment-methods/stats",
    ] {
        mount_stats(&backend, route, json!({"data": {}}), 2).await;
    }
    for days in ["30", "7"] {
        Mock::given(method("GET"))
            .and(path("/api/v1/admin/billing/revenue/trends"))
            .and(query_param("period", "daily"))
            .and(query_param("days", days))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"days": days}})))
            .expect(1)
            .mount(&backend)
            .await;
    }

    let state = state_for(config_for(&backend.uri()));
    let server = server_for(state.clone());
    let (name, value) = admin();

    let month = server
        .get("/v1/admin/dashboard/revenue/analytics")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(month["data"]["trends"]["days"], "30");
    assert_eq!(month["data"]["fromCache"], false);

    for expect_cached in [false, true] {
        let week = server
            .get("/v1/admin/dashboard/revenue/analytics")
            .add_query_param("days", "7")
            .add_header(name.clone(), value.clone())
            .await
            .json::<Value>();
        assert_eq!(week["data"]["trends"]["days"], "7");
        assert_eq!(week["data"]["fromCache"], expect_cached);
    }

    assert_eq!(state.cache.count("admin:revenue:analytics:*").await.unwrap(), 2);
    assert_eq!(
        state.cache.count("admin:revenue:analytics:daily:7").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_lookup_forwards_query_and_keys_cache_by_params() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/admin/appointments/trends"))
        .and(query_param("period", "weekly"))
        .and(query_param("days", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [1, 2, 3]})))
        .expect(1)
        .mount(&backend)
        .await;

    let state = state_for(config_for(&backend.uri()));
    let server = server_for(state.clone());
    let (name, value) = admin();

    for expect_cached in [false, true] {
        let body = server
            .get("/v1/admin/dashboard/appointments/trends")
            .add_query_param("period", "weekly")
            .add_header(name.clone(), value.clone())
            .await
            .json::<Value>();
        assert_eq!(body["data"]["data"], json!([1, 2, 3]));
        assert_eq!(body["data"]["available"], true);
        assert_eq!(body["data"]["fromCache"], expect_cached);
    }

    assert_eq!(
        state.cache.count("admin:appointments:trends:weekly:30").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_failed_lookup_is_not_cached() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/admin/patients/demographics"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&backend)
        .await;

    let server = server_for(state_for(config_for(&backend.uri())));
    let (name, value) = admin();

    for _ in 0..2 {
        let body = server
            .get("/v1/admin/dashboard/patients/demographics")
            .add_header(name.clone(), value.clone())
            .await
            .json::<Value>();
        assert_eq!(body["data"]["available"], false);
        assert_eq!(body["data"]["data"], Value::Null);
        assert_eq!(body["data"]["fromCache"], false);
    }
}

#[tokio::test]
async fn test_system_health_degraded_is_207() {
    let backend = MockServer::start().await;
    // Every service but billing shares the mock server
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "UP"})))
        .mount(&backend)
        .await;

    let mut config = config_for(&backend.uri());
    config.services.get_mut("billing").unwrap().url = "http://127.0.0.1:9".into();
    let server = server_for(state_for(config));
    let (name, value) = admin();

    let response = server.get("/v1/admin/system/health").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::MULTI_STATUS);

    let data = &response.json::<Value>()["data"];
    assert_eq!(data["overall"], "degraded");
    assert_eq!(data["healthyCount"], 5);
    assert_eq!(data["totalCount"], 6);
    assert_eq!(data["healthPercentage"], 83);
    let billing = data["services"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "billing")
        .unwrap();
    assert_eq!(billing["status"], "unhealthy");
    assert!(billing["error"].is_string());
}

#[tokio::test]
async fn test_alerts_reflect_open_breaker() {
    let backend = MockServer::start().await;
    let mut config = config_for(&backend.uri());
    config.circuit_breaker.defaults.failure_threshold = 1;
    config.circuit_breaker.defaults.recovery_timeout = Duration::from_secs(60);
    let state = state_for(config);

    let breaker = state.breakers.get_or_create("doctors");
    breaker.on_failure();
    state.registry.mark_unhealthy("doctors", "connection refused");

    let server = server_for(state);
    let (name, value) = admin();
    let data = server
        .get("/v1/admin/dashboard/alerts")
        .add_header(name, value)
        .await
        .json::<Value>()["data"]
        .clone();

    assert_eq!(data["critical"][0]["service"], "doctors");
    assert_eq!(data["critical"][0]["type"], "circuit_open");
    assert_eq!(data["warning"][0]["service"], "doctors");
    assert_eq!(data["total"], 2);
}

#[tokio::test]
async fn test_cache_stats_and_system_info() {
    let backend = MockServer::start().await;
    let state = state_for(config_for(&backend.uri()));
    state
        .cache
        .set_json("admin:stats:v1", &json!({"x": 1}), Duration::from_secs(30))
        .await
        .unwrap();
    state
        .cache
        .set_json("session:abc", &json!({}), Duration::from_secs(30))
        .await
        .unwrap();

    let server = server_for(state);
    let (name, value) = admin();

    let stats = server
        .get("/v1/admin/dashboard/cache-stats")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(stats["data"]["backend"], "memory");
    assert_eq!(stats["data"]["connected"], true);
    assert_eq!(stats["data"]["totalKeys"], 2);
    assert_eq!(stats["data"]["adminKeys"], 1);

    let info = server
        .get("/v1/admin/system/info")
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(info["data"]["gateway"]["name"], "Smart Health API Gateway");
    assert_eq!(info["data"]["cache"]["backend"], "memory");
    assert!(info["data"]["uptime"]["formatted"].as_str().unwrap().ends_with('s'));
}
