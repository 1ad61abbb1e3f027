//! # Admin Dashboard Endpoints
//!
//! Routes mounted under `/v1/admin`. The server wraps this router in `require_admin`, so
//! every handler here can assume an ADMIN caller.
//!
//! ## Admin Endpoints
//! - GET  /dashboard/stats - Aggregated headline numbers
//! - POST /dashboard/refresh - Drop cached stats
//! - GET  /dashboard/cache-stats - Cache backend and key counts
//! - GET  /dashboard/alerts - Alerts derived from breakers and service health
//! - GET  /dashboard/revenue/analytics - Billing fan-out
//! - GET  /dashboard/{lookup} - Single-backend lookups, see [`LOOKUPS`]
//! - GET  /system/health - 200 healthy, 207 degraded, 503 critical
//! - GET  /system/info - Gateway identity and uptime

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::admin::dashboard::{DashboardAggregator, LookupRoute, LOOKUPS};
use crate::core::error::GatewayResult;
use crate::core::types::RequestId;

/// Cache namespace dropped by `POST /dashboard/refresh`
pub const STATS_NAMESPACE: &str = "admin:stats:*";

/// Shared state for the admin handlers
#[derive(Clone)]
pub struct AdminState {
    pub aggregator: Arc<DashboardAggregator>,
}

/// Builds the admin router
pub struct AdminRouter;

impl AdminRouter {
    /// Router with its state applied, ready to nest into any parent router
    pub fn create_router<S>(state: AdminState) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let mut router: Router<AdminState> = Router::new()
            .route("/dashboard/stats", get(get_stats))
            .route("/dashboard/refresh", post(refresh_stats))
            .route("/dashboard/cache-stats", get(get_cache_stats))
            .route("/dashboard/alerts", get(get_alerts))
            .route("/dashboard/revenue/analytics", get(get_revenue_analytics))
            .route("/system/health", get(get_system_health))
            .route("/system/info", get(get_system_info));

        for entry in LOOKUPS {
            router = router.route(
                &format!("/dashboard/{}", entry.route),
                get(
                    move |state: State<AdminState>,
                          query: Query<HashMap<String, String>>,
                          request_id: Option<Extension<RequestId>>| {
                        get_lookup(state, query, request_id, entry)
                    },
                ),
            );
        }

        router.with_state(state)
    }
}

/// `{success: true, data, meta: {requestId, responseTime, timestamp}}`
pub fn envelope(data: Value, request_id: Option<&RequestId>, started: Instant) -> Value {
    json!({
        "success": true,
        "data": data,
        "meta": {
            "requestId": request_id.map(RequestId::as_str),
            "responseTime": format!("{}ms", started.elapsed().as_millis()),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        },
    })
}

fn request_id(extension: &Option<Extension<RequestId>>) -> Option<&RequestId> {
    extension.as_ref().map(|Extension(id)| id)
}

async fn get_stats(
    State(state): State<AdminState>,
    id: Option<Extension<RequestId>>,
) -> GatewayResult<Json<Value>> {
    let started = Instant::now();
    let stats = state.aggregator.get_aggregated_stats().await?;
    Ok(Json(envelope(stats, request_id(&id), started)))
}

async fn refresh_stats(
    State(state): State<AdminState>,
    id: Option<Extension<RequestId>>,
) -> GatewayResult<Json<Value>> {
    let started = Instant::now();
    let deleted = state.aggregator.invalidate(STATS_NAMESPACE).await?;
    info!(pattern = STATS_NAMESPACE, deleted, "Dashboard stats cache refreshed");
    Ok(Json(envelope(
        json!({ "deletedKeys": deleted, "pattern": STATS_NAMESPACE }),
        request_id(&id),
        started,
    )))
}

async fn get_cache_stats(
    State(state): State<AdminState>,
    id: Option<Extension<RequestId>>,
) -> Json<Value> {
    let started = Instant::now();
    let stats = state.aggregator.cache_stats().await;
    Json(envelope(stats, request_id(&id), started))
}

async fn get_alerts(
    State(state): State<AdminState>,
    id: Option<Extension<RequestId>>,
) -> GatewayResult<Json<Value>> {
    let started = Instant::now();
    let alerts = state.aggregator.active_alerts().await?;
    Ok(Json(envelope(alerts, request_id(&id), started)))
}

async fn get_revenue_analytics(
    State(state): State<AdminState>,
    Query(query): Query<HashMap<String, String>>,
    id: Option<Extension<RequestId>>,
) -> GatewayResult<Json<Value>> {
    let started = Instant::now();
    let analytics = state.aggregator.revenue_analytics(&query).await?;
    Ok(Json(envelope(analytics, request_id(&id), started)))
}

async fn get_lookup(
    State(state): State<AdminState>,
    Query(query): Query<HashMap<String, String>>,
    id: Option<Extension<RequestId>>,
    entry: &'static LookupRoute,
) -> GatewayResult<Json<Value>> {
    let started = Instant::now();
    let result = state.aggregator.lookup(entry, &query).await?;
    Ok(Json(envelope(result, request_id(&id), started)))
}

/// Status code for the system health view's `overall` field
pub fn system_health_status(overall: Option<&str>) -> StatusCode {
    match overall {
        Some("healthy") => StatusCode::OK,
        Some("degraded") => StatusCode::MULTI_STATUS,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn get_system_health(
    State(state): State<AdminState>,
    id: Option<Extension<RequestId>>,
) -> GatewayResult<Response> {
    let started = Instant::now();
    let health = state.aggregator.system_health().await?;
    let status = system_health_status(health.get("overall").and_then(Value::as_str));
    Ok((status, Json(envelope(health, request_id(&id), started))).into_response())
}

async fn get_system_info(
    State(state): State<AdminState>,
    id: Option<Extension<RequestId>>,
) -> Json<Value> {
    let started = Instant::now();
    let info = state.aggregator.system_info().await;
    Json(envelope(info, request_id(&id), started))
}
