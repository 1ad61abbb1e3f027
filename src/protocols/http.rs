//! # HTTP Reverse Proxy
//!
//! One forwarding pipeline shared by every backend. What differs per service lives in a
//! [`ProxyStrategy`]: how the path is rewritten, which trust headers are added, and how the
//! outcome is reported. [`DefaultStrategy`] derives all of that from the service's
//! descriptor, so adding a backend is a configuration change.
//!
//! ## Pipeline
//! 1. Resolve the service from the path (`/v{n}/{name|alias}/...` or `/v{n}/public/{name}/...`)
//! 2. Rewrite the path, copy end-to-end headers, inject trust headers
//! 3. Buffer the body (413 over [`MAX_BODY_BYTES`]); JSON bodies are re-serialized compactly
//! 4. Ask the service's circuit breaker for admission
//! 5. Send with the service timeout, relay status/headers/body, report the outcome
//!
//! ## Rust Concepts Used
//!
//! - `Arc<dyn ProxyStrategy>` trait objects so services can swap hooks without touching the
//!   forwarding code
//! - Header conversion between axum's `http` 1.x types and reqwest's `http` 0.2 types via
//!   their string/byte forms

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{
    HeaderMap as UpstreamHeaders, HeaderName as UpstreamHeaderName,
    HeaderValue as UpstreamHeaderValue,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{
    AuthContext, RequestId, GATEWAY_NAME_HEADER, REQUEST_ID_HEADER, RESPONSE_TIME_HEADER,
};
use crate::discovery::{ServiceDescriptor, ServiceRegistry};
use crate::observability::metrics::record_proxy;

/// Largest request body the gateway will buffer
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers never copied between hops
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Identity headers only the gateway may set
const TRUSTED: &[&str] = &[
    "x-user-id",
    "x-user-role",
    "x-user-authorities",
    "x-doctor-id",
    "x-gateway-name",
    "x-request-id",
];

/// Per-request facts the strategy needs to build trust headers
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub request_id: RequestId,
    pub gateway_name: String,
    pub auth: Option<AuthContext>,
    pub authorization: Option<String>,
}

impl ForwardContext {
    /// Trust headers every upstream receives, over HTTP and on the WebSocket handshake
    pub fn trust_headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("x-gateway-name", self.gateway_name.clone()),
            ("x-request-id", self.request_id.as_str().to_string()),
        ];

        if let Some(auth) = &self.auth {
            out.push(("x-user-id", auth.user_id.clone()));
            out.push(("x-user-role", auth.role.clone()));
            let authorities =
                serde_json::to_string(&auth.authorities).unwrap_or_else(|_| "[]".to_string());
            out.push(("x-user-authorities", authorities));

            if auth.is_doctor() {
                if let Some(doctor_id) = &auth.doctor_id {
                    out.push(("x-doctor-id", doctor_id.clone()));
                }
            }
        }

        if let Some(authorization) = &self.authorization {
            out.push(("authorization", authorization.clone()));
        }
        out
    }
}

/// Per-service forwarding hooks
pub trait ProxyStrategy: Send + Sync {
    fn descriptor(&self) -> &ServiceDescriptor;

    /// Map an inbound path (no query string) to the backend path, `None` if it does not belong here
    fn rewrite_path(&self, path: &str) -> Option<String>;

    fn inject_headers(&self, headers: &mut UpstreamHeaders, ctx: &ForwardContext);

    /// Backend answered with a status below 500
    fn on_success(&self, status: u16);

    /// Backend answered with 5xx or could not be reached
    fn on_failure(&self, reason: &str);
}

/// `/v{digits}/` prefix removed, or `None`
fn strip_version(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/v")?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    rest[digits..].strip_prefix('/')
}

/// `segment` removed from the front of `path` when it ends at a segment boundary
fn strip_segment<'a>(path: &'a str, segment: &str) -> Option<&'a str> {
    let tail = path.strip_prefix(segment)?;
    match tail.chars().next() {
        None | Some('/') | Some('?') => Some(tail),
        _ => None,
    }
}

/// Rewrite `/v{n}/{segment}{tail}` or `/v{n}/public/{segment}{tail}` to `{base_path}{tail}`
/// for the first matching segment.
pub fn rewrite_path<'s>(
    path: &str,
    segments: impl IntoIterator<Item = &'s str>,
    base_path: &str,
) -> Option<String> {
    let rest = strip_version(path)?;
    let public = rest.strip_prefix("public/");

    for segment in segments {
        let tail = public
            .and_then(|p| strip_segment(p, segment))
            .or_else(|| strip_segment(rest, segment));
        if let Some(tail) = tail {
            let rewritten = format!("{}{}", base_path, tail);
            return Some(if rewritten.is_empty() {
                "/".to_string()
            } else {
                rewritten
            });
        }
    }
    None
}

/// First path segment naming a service, after the version and optional `public/`
pub fn service_segment(path: &str) -> Option<&str> {
    let rest = strip_version(path)?;
    let rest = rest.strip_prefix("public/").unwrap_or(rest);
    let segment = rest.split(['/', '?']).next()?;
    (!segment.is_empty()).then_some(segment)
}

/// Descriptor-driven strategy used for every service unless overridden
pub struct DefaultStrategy {
    descriptor: Arc<ServiceDescriptor>,
    registry: Arc<ServiceRegistry>,
    breaker: Arc<CircuitBreaker>,
}

impl DefaultStrategy {
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        registry: Arc<ServiceRegistry>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            descriptor,
            registry,
            breaker,
        }
    }
}

fn insert_upstream(headers: &mut UpstreamHeaders, name: &'static str, value: &str) {
    if let Ok(value) = UpstreamHeaderValue::from_str(value) {
        headers.insert(UpstreamHeaderName::from_static(name), value);
    }
}

impl ProxyStrategy for DefaultStrategy {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn rewrite_path(&self, path: &str) -> Option<String> {
        let d = &self.descriptor;
        let segments = std::iter::once(d.name.as_str()).chain(d.aliases.iter().map(String::as_str));
        rewrite_path(path, segments, &d.base_path)
    }

    fn inject_headers(&self, headers: &mut UpstreamHeaders, ctx: &ForwardContext) {
        for (name, value) in ctx.trust_headers() {
            insert_upstream(headers, name, &value);
        }
    }

    fn on_success(&self, _status: u16) {
        self.registry.mark_healthy(&self.descriptor.name);
        self.breaker.on_success();
    }

    fn on_failure(&self, reason: &str) {
        self.registry.mark_unhealthy(&self.descriptor.name, reason);
        self.breaker.on_failure();
    }
}

/// Forwarding front-end for all registered services
pub struct ServiceProxy {
    client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    strategies: HashMap<String, Arc<dyn ProxyStrategy>>,
}

impl ServiceProxy {
    /// Build a proxy with a [`DefaultStrategy`] for every registered service
    pub fn new(
        client: reqwest::Client,
        registry: Arc<ServiceRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let strategies = registry
            .list_all()
            .into_iter()
            .map(|descriptor| {
                let breaker = breakers.get_or_create(&descriptor.name);
                let name = descriptor.name.clone();
                let strategy: Arc<dyn ProxyStrategy> = Arc::new(DefaultStrategy::new(
                    descriptor,
                    Arc::clone(&registry),
                    breaker,
                ));
                (name, strategy)
            })
            .collect();

        Self {
            client,
            registry,
            breakers,
            strategies,
        }
    }

    /// Replace the hooks for one service
    pub fn with_strategy(mut self, service: impl Into<String>, strategy: Arc<dyn ProxyStrategy>) -> Self {
        self.strategies.insert(service.into(), strategy);
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Logical service name an inbound path routes to
    pub fn resolve(&self, path: &str) -> GatewayResult<String> {
        let segment = service_segment(path)
            .ok_or_else(|| GatewayError::unknown_service(path.to_string()))?;
        self.registry
            .resolve_segment(segment)
            .map(|d| d.name.clone())
            .ok_or_else(|| GatewayError::unknown_service(segment))
    }

    /// Forward one request to `service`
    #[instrument(skip(self, request, ctx), fields(request_id = %ctx.request_id, method = %request.method(), path = %request.uri().path()))]
    pub async fn forward(
        &self,
        service: &str,
        request: Request,
        ctx: &ForwardContext,
    ) -> GatewayResult<Response> {
        let strategy = self
            .strategies
            .get(service)
            .cloned()
            .ok_or_else(|| GatewayError::unknown_service(service))?;
        let breaker = self.breakers.get_or_create(service);

        // Client-side problems surface before the breaker is consulted
        let outbound = prepare(strategy.as_ref(), request, ctx).await?;

        // No outbound attempt while the breaker is open
        breaker.try_acquire()?;

        let started = Instant::now();
        let result = self.dispatch(service, outbound).await;
        let elapsed = started.elapsed();

        match result {
            Ok((status, headers, body)) => {
                if status.as_u16() < 500 {
                    strategy.on_success(status.as_u16());
                    record_proxy(service, "success", elapsed);
                } else {
                    strategy.on_failure(&format!("upstream returned {}", status));
                    record_proxy(service, "upstream_error", elapsed);
                }
                info!(
                    service,
                    status = status.as_u16(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Proxied request"
                );
                build_response(status, &headers, body, ctx, elapsed.as_millis())
            }
            Err(err) if err.is_upstream_failure() => {
                strategy.on_failure(&err.to_string());
                record_proxy(service, err.error_type(), elapsed);
                warn!(service, error = %err, elapsed_ms = elapsed.as_millis() as u64, "Proxy call failed");
                Err(err)
            }
            Err(err) => {
                breaker.release_trial();
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        service: &str,
        outbound: Outbound,
    ) -> GatewayResult<(StatusCode, UpstreamHeaders, Bytes)> {
        let timeout_ms = outbound.timeout.as_millis() as u64;
        debug!(service, url = %outbound.url, "Forwarding request");

        let mut builder = self
            .client
            .request(outbound.method, &outbound.url)
            .headers(outbound.headers)
            .timeout(outbound.timeout);
        if let Some(payload) = outbound.body {
            builder = builder
                .header(reqwest::header::CONTENT_LENGTH, payload.len())
                .body(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(service, timeout_ms, &e))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| GatewayError::internal(format!("Invalid upstream status: {}", e)))?;
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(service, timeout_ms, &e))?;

        Ok((status, headers, body))
    }
}

/// Everything needed to send one upstream request
struct Outbound {
    method: reqwest::Method,
    url: String,
    headers: UpstreamHeaders,
    body: Option<Bytes>,
    timeout: std::time::Duration,
}

/// Rewrite the path, filter and inject headers, and buffer the body
async fn prepare(
    strategy: &dyn ProxyStrategy,
    request: Request,
    ctx: &ForwardContext,
) -> GatewayResult<Outbound> {
    let descriptor = strategy.descriptor();
    let service = descriptor.name.as_str();
    let (parts, body) = request.into_parts();

    let path = strategy
        .rewrite_path(parts.uri.path())
        .ok_or_else(|| GatewayError::unknown_service(service))?;
    let url = match parts.uri.query() {
        Some(query) => format!("{}{}?{}", descriptor.base_url, path, query),
        None => format!("{}{}", descriptor.base_url, path),
    };

    let mut headers = UpstreamHeaders::new();
    for (name, value) in parts.headers.iter() {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || TRUSTED.contains(&lower) || lower == "authorization" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            UpstreamHeaderName::from_bytes(lower.as_bytes()),
            UpstreamHeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    strategy.inject_headers(&mut headers, ctx);

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| GatewayError::internal(format!("Unsupported method: {}", e)))?;

    let raw = read_body(&parts.headers, body, MAX_BODY_BYTES).await?;
    let payload = normalize_body(&parts.headers, raw);
    let body = (matches!(parts.method, Method::POST | Method::PUT | Method::PATCH)
        || !payload.is_empty())
    .then_some(payload);

    Ok(Outbound {
        method,
        url,
        headers,
        body,
        timeout: descriptor.timeout,
    })
}

/// Buffer at most `limit` bytes of the request body
async fn read_body(headers: &axum::http::HeaderMap, body: Body, limit: usize) -> GatewayResult<Bytes> {
    let too_large = || GatewayError::PayloadTooLarge { limit_bytes: limit };

    let declared = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let mut buffer = BytesMut::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| GatewayError::internal(format!("Failed to read request body: {}", e)))?;
        if buffer.len() + chunk.len() > limit {
            return Err(too_large());
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

/// Re-serialize JSON bodies compactly; anything else passes through untouched
fn normalize_body(headers: &axum::http::HeaderMap, raw: Bytes) -> Bytes {
    let is_json = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);

    if !is_json || raw.is_empty() {
        return raw;
    }

    match serde_json::from_slice::<serde_json::Value>(&raw) {
        Ok(value) => serde_json::to_vec(&value).map(Bytes::from).unwrap_or(raw),
        Err(_) => raw,
    }
}

/// Map a reqwest failure onto the gateway taxonomy
pub fn classify_transport_error(service: &str, timeout_ms: u64, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout {
            service: service.to_string(),
            timeout_ms,
        }
    } else if err.is_connect() {
        GatewayError::service_unavailable(service, err.to_string())
    } else {
        GatewayError::Upstream {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

fn build_response(
    status: StatusCode,
    upstream: &UpstreamHeaders,
    body: Bytes,
    ctx: &ForwardContext,
    elapsed_ms: u128,
) -> GatewayResult<Response> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in upstream.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let mut set = |name: &'static str, value: &str| {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    set(RESPONSE_TIME_HEADER, &format!("{}ms", elapsed_ms));
    set(GATEWAY_NAME_HEADER, &ctx.gateway_name);
    set(REQUEST_ID_HEADER, ctx.request_id.as_str());

    Ok(response)
}
