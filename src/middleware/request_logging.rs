//! # Request Correlation and Logging
//!
//! Outermost gateway middleware. It assigns the request id (the caller's `X-Request-ID`, or a
//! generated `req_{millis}_{suffix}`), stores it in request extensions, runs the rest of the
//! stack inside a span carrying it, and stamps the correlation headers on every response.

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::core::types::{RequestId, GATEWAY_NAME_HEADER, REQUEST_ID_HEADER, RESPONSE_TIME_HEADER};

/// Values stamped on every response
#[derive(Debug, Clone)]
pub struct RequestLogging {
    gateway_name: String,
}

impl RequestLogging {
    pub fn new(gateway_name: impl Into<String>) -> Self {
        Self {
            gateway_name: gateway_name.into(),
        }
    }

    pub fn gateway_name(&self) -> &str {
        &self.gateway_name
    }

    fn log_request(&self, method: &str, path: &str, status: u16, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        if status >= 500 {
            warn!(method, path, status, duration_ms, "Request failed");
        } else {
            info!(method, path, status, duration_ms, "Request processed");
        }
    }
}

/// Assign the request id and add `X-Request-ID`, `X-Response-Time` and `X-Gateway-Name`
pub async fn request_context_middleware(
    State(logging): State<Arc<RequestLogging>>,
    mut request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let request_id = RequestId::from_headers(request.headers());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    request.extensions_mut().insert(request_id.clone());

    let span = info_span!("request", request_id = %request_id, %method, %path);
    let mut response = next.run(request).instrument(span.clone()).await;

    let headers = response.headers_mut();
    set_if_absent(headers, REQUEST_ID_HEADER, request_id.as_str());
    set_if_absent(
        headers,
        RESPONSE_TIME_HEADER,
        &format!("{}ms", started.elapsed().as_millis()),
    );
    set_if_absent(headers, GATEWAY_NAME_HEADER, logging.gateway_name());

    span.in_scope(|| logging.log_request(&method, &path, response.status().as_u16(), started));
    response
}

fn set_if_absent(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if headers.contains_key(name) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|Extension(id): Extension<RequestId>| async move { id.to_string() }),
            )
            .layer(axum::middleware::from_fn_with_state(
                Arc::new(RequestLogging::new("test-gateway")),
                request_context_middleware,
            ))
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_kept() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header("x-request-id", "trace-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "trace-42");
        assert_eq!(response.headers()["x-gateway-name"], "test-gateway");
        assert!(response.headers()["x-response-time"].to_str().unwrap().ends_with("ms"));

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"trace-42");
    }

    #[tokio::test]
    async fn test_request_id_generated_when_missing() {
        let response = app()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()["x-request-id"].to_str().unwrap();
        assert!(id.starts_with("req_"));
    }
}
