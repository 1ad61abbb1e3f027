//! # Authentication Middleware
//!
//! Optional bearer authentication. A valid token attaches an [`AuthContext`] to the request
//! extensions; a missing token leaves the caller anonymous. An invalid token is rejected on
//! `/v1/**` service routes and ignored on `/v1/auth/**` and `/v1/public/**`, where callers
//! are expected to arrive without (or with stale) credentials.
//!
//! ## Rust Concepts Used
//!
//! - `axum::middleware::from_fn_with_state` functions instead of hand-written `tower::Service`s
//! - Request extensions as the typed hand-off between middleware and handlers

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::providers::JwtDecoder;
use crate::core::error::GatewayError;
use crate::core::types::AuthContext;

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Routes where a bad token must be refused instead of downgraded to anonymous
pub fn requires_valid_token(path: &str) -> bool {
    path.starts_with("/v1/")
        && !path.starts_with("/v1/auth/")
        && !path.starts_with("/v1/public/")
}

/// Decode the bearer token, if any, into request extensions
pub async fn auth_middleware(
    State(decoder): State<Arc<JwtDecoder>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return next.run(request).await;
    };

    if !decoder.is_enabled() {
        debug!("Bearer token present but no JWT secret configured, treating as anonymous");
        return next.run(request).await;
    }

    match decoder.decode(token) {
        Ok(context) => {
            debug!(user_id = %context.user_id, role = %context.role, "Authenticated request");
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) if requires_valid_token(request.uri().path()) => {
            warn!(target: "security", path = %request.uri().path(), error = %err, "Rejected invalid bearer token");
            err.into_response()
        }
        Err(err) => {
            debug!(error = %err, "Ignoring invalid bearer token on open route");
            next.run(request).await
        }
    }
}

/// Gate for admin routes: 401 without an identity, 403 for any role but ADMIN
pub async fn require_admin(request: Request, next: Next) -> Response {
    match request.extensions().get::<AuthContext>() {
        None => GatewayError::unauthorized("Authentication required").into_response(),
        Some(context) if !context.is_admin() => {
            warn!(
                target: "security",
                user_id = %context.user_id,
                role = %context.role,
                path = %request.uri().path(),
                "Non-admin caller on admin route"
            );
            GatewayError::forbidden("Admin role required").into_response()
        }
        Some(_) => next.run(request).await,
    }
}
