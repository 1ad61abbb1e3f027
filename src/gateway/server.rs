//! # HTTP Server Module
//!
//! Wires every subsystem into one axum application and runs it.
//!
//! ## Request flow
//!
//! ```text
//! CORS → TraceLayer → request context (X-Request-ID) → auth → rate limit → route
//! ```
//!
//! Routes:
//! - `/health`, `/api/health`, `/health/detailed`, `/health/services[/:name]`
//! - `GET /v1` version info
//! - `/v1/admin/**` admin dashboard (ADMIN only)
//! - `/v1/**` reverse proxy to the backend named by the first segment
//! - `{websocket_path}/**` WebSocket relay to the chat backend
//! - `/metrics` Prometheus text, when enabled
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` for sharing server state across async tasks
//! - `axum::middleware::from_fn_with_state` for the gateway's own middleware
//! - `tokio::select!` to bound the graceful shutdown drain

use axum::{
    extract::{Path, Request, State, WebSocketUpgrade},
    http::{header, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::admin::dashboard::format_uptime;
use crate::admin::{AdminRouter, AdminState, DashboardAggregator, GatewayIdentity};
use crate::auth::{auth_middleware, require_admin, JwtDecoder};
use crate::caching::CacheStore;
use crate::core::circuit_breaker::CircuitBreakerRegistry;
use crate::core::config::GatewayConfig;
use crate::core::error::{set_expose_error_details, GatewayError, GatewayResult};
use crate::core::types::{AuthContext, RequestId};
use crate::discovery::{ServiceRegistry, ServiceSummary};
use crate::middleware::{rate_limit_middleware, request_context_middleware, RequestLogging, TieredRateLimiter};
use crate::observability::health::log_probe_schedule;
use crate::observability::HealthProbe;
use crate::protocols::{ForwardContext, ServiceProxy, WebSocketRelay};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<ServiceRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub cache: CacheStore,
    pub proxy: Arc<ServiceProxy>,
    pub relay: Arc<WebSocketRelay>,
    pub limiter: Arc<TieredRateLimiter>,
    pub decoder: Arc<JwtDecoder>,
    pub aggregator: Arc<DashboardAggregator>,
    pub probe: HealthProbe,
    pub prometheus: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl ServerState {
    /// Build every subsystem from the configuration
    pub fn new(
        config: GatewayConfig,
        cache: CacheStore,
        prometheus: Option<PrometheusHandle>,
    ) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to build HTTP client: {}", e)))?;

        let registry = Arc::new(ServiceRegistry::from_config(&config.services));
        let breakers = Arc::new(CircuitBreakerRegistry::with_overrides(
            config.circuit_breaker.defaults.clone(),
            config.circuit_breaker.per_service.clone(),
        ));

        let proxy = Arc::new(ServiceProxy::new(
            client.clone(),
            Arc::clone(&registry),
            Arc::clone(&breakers),
        ));
        let relay = Arc::new(WebSocketRelay::new(
            Arc::clone(&registry),
            config.server.websocket_path.clone(),
        ));
        let limiter = Arc::new(TieredRateLimiter::new(
            &config.rate_limit,
            config.server.environment,
            cache.redis().map(|redis| redis.connection()),
        ));
        let decoder = Arc::new(JwtDecoder::new(&config.auth));
        let aggregator = Arc::new(DashboardAggregator::new(
            client.clone(),
            Arc::clone(&registry),
            Arc::clone(&breakers),
            cache.clone(),
            config.dashboard.clone(),
            GatewayIdentity::from_config(&config),
        ));
        let probe = HealthProbe::new(Arc::clone(&registry), client);

        Ok(Self {
            config: Arc::new(config),
            registry,
            breakers,
            cache,
            proxy,
            relay,
            limiter,
            decoder,
            aggregator,
            probe,
            prometheus,
            started_at: Instant::now(),
        })
    }

    fn forward_context(&self, request: &Request) -> ForwardContext {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId::from_headers(request.headers()));
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        ForwardContext {
            request_id,
            gateway_name: self.config.server.gateway_name.clone(),
            auth: request.extensions().get::<AuthContext>().cloned(),
            authorization,
        }
    }
}

/// Build the full application router
pub fn build_router(state: ServerState) -> Router {
    set_expose_error_details(!state.config.server.environment.is_production());

    let admin = AdminRouter::create_router(AdminState {
        aggregator: Arc::clone(&state.aggregator),
    })
    .layer(from_fn(require_admin));

    let socket_path = state.config.server.websocket_path.trim_end_matches('/').to_string();
    let mut app = Router::new()
        .route("/health", get(liveness))
        .route("/api/health", get(liveness))
        .route("/health/detailed", get(detailed_health))
        .route("/health/services", get(services_health))
        .route("/health/services/:name", get(service_health))
        .route("/v1", get(version_info))
        .route("/v1/*rest", any(proxy_request))
        .route(&socket_path, any(socket_upgrade))
        .route(&format!("{}/*rest", socket_path), any(socket_upgrade));

    if state.prometheus.is_some() {
        app = app.route(&state.config.metrics.path, get(render_metrics));
    }

    let logging = Arc::new(RequestLogging::new(state.config.server.gateway_name.clone()));
    app.nest("/v1/admin", admin)
        .fallback(not_found)
        .layer(from_fn_with_state(Arc::clone(&state.limiter), rate_limit_middleware))
        .layer(from_fn_with_state(Arc::clone(&state.decoder), auth_middleware))
        .layer(from_fn_with_state(logging, request_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn liveness(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "UP",
        "service": state.config.server.gateway_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn detailed_health(State(state): State<ServerState>) -> Json<Value> {
    let uptime = state.started_at.elapsed();
    let services: Vec<ServiceSummary> = state
        .registry
        .list_all()
        .iter()
        .map(|d| ServiceSummary::from(d.as_ref()))
        .collect();

    Json(json!({
        "status": "UP",
        "service": state.config.server.gateway_name,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.server.environment.as_str(),
        "uptime": {
            "seconds": uptime.as_secs(),
            "formatted": format_uptime(uptime),
        },
        "rateLimiting": state.limiter.describe(),
        "circuitBreakers": state.breakers.snapshots(),
        "services": services,
        "cache": {
            "backend": state.cache.kind(),
            "connected": state.cache.is_connected().await,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn services_health(State(state): State<ServerState>) -> Response {
    let report = state.probe.probe_all().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn service_health(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> GatewayResult<Response> {
    let result = state.probe.probe(&name).await?;
    let status = if result.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(result)).into_response())
}

async fn version_info(State(state): State<ServerState>) -> Json<Value> {
    let services: Vec<String> = state
        .registry
        .list_all()
        .iter()
        .map(|d| d.name.clone())
        .collect();

    Json(json!({
        "name": state.config.server.gateway_name,
        "version": env!("CARGO_PKG_VERSION"),
        "apiVersion": "v1",
        "environment": state.config.server.environment.as_str(),
        "services": services,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `/v1/**`: upgrades are refused here, everything else goes through the proxy
async fn proxy_request(
    State(state): State<ServerState>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    let ctx = state.forward_context(&request);
    if let Some(ws) = ws {
        return Arc::clone(&state.relay).upgrade(ws, request.uri().clone(), ctx);
    }

    let service = match state.proxy.resolve(request.uri().path()) {
        Ok(service) => service,
        Err(err) => return err.into_response(),
    };

    match state.proxy.forward(&service, request, &ctx).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn socket_upgrade(
    State(state): State<ServerState>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    let Some(ws) = ws else {
        return (
            StatusCode::UPGRADE_REQUIRED,
            Json(json!({
                "success": false,
                "message": "WebSocket upgrade required",
                "code": StatusCode::UPGRADE_REQUIRED.as_u16(),
                "path": request.uri().path(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
            .into_response();
    };

    let ctx = state.forward_context(&request);
    Arc::clone(&state.relay).upgrade(ws, request.uri().clone(), ctx)
}

async fn render_metrics(State(state): State<ServerState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn not_found(request: Request) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": "Route not found",
            "code": 404,
            "type": "NOT_FOUND",
            "path": request.uri().path(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// The gateway: router plus the background probe, bound to the configured address
pub struct GatewayServer {
    state: ServerState,
    app: Router,
}

impl GatewayServer {
    pub fn new(state: ServerState) -> Self {
        let app = build_router(state.clone());
        Self { state, app }
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn bind_addr(&self) -> GatewayResult<SocketAddr> {
        self.state
            .config
            .server
            .bind_address
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))
    }

    /// Serve until Ctrl-C or SIGTERM, then drain in-flight requests for up to the grace period
    pub async fn start(self) -> GatewayResult<()> {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", addr, e)))?;

        let interval = self.state.config.server.health_check_interval;
        log_probe_schedule(interval);
        let probe_task = (!interval.is_zero()).then(|| self.state.probe.clone().spawn_background(interval));

        info!(
            %addr,
            services = self.state.registry.len(),
            cache = self.state.cache.kind(),
            environment = self.state.config.server.environment.as_str(),
            "Gateway listening"
        );

        let grace = self.state.config.server.graceful_shutdown_timeout;
        let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
        let server = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();
        tokio::pin!(server);

        let drain_deadline = async move {
            if signalled_rx.await.is_ok() {
                tokio::time::sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let outcome = tokio::select! {
            result = &mut server => result
                .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e))),
            _ = drain_deadline => {
                warn!(grace = ?grace, "In-flight requests still running after grace period, shutting down");
                Ok(())
            }
        };

        if let Some(task) = probe_task {
            task.abort();
        }
        if let Err(ref e) = outcome {
            error!(error = %e, "Gateway server stopped with an error");
        } else {
            info!("Gateway server stopped");
        }
        outcome
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
