//! # Health Gateway Library - Core Library Crate
//!
//! Traffic-control layer of the healthcare platform's API gateway: request routing to the
//! backend services, per-service circuit breaking, tiered rate limiting, a WebSocket relay to
//! the chat backend, and the admin dashboard that aggregates backend statistics behind a
//! read-through cache.
//!
//! ## Module Layout
//!
//! - `core`: errors, configuration, request-scoped types, the circuit breaker
//! - `discovery`: the service registry and its health bookkeeping
//! - `protocols`: the HTTP reverse proxy and the WebSocket relay
//! - `middleware`: request correlation and rate limiting
//! - `auth`: optional bearer decoding and the admin gate
//! - `caching`: the cache store (Redis or in-memory) behind the dashboard
//! - `admin`: dashboard aggregation and its routes
//! - `observability`: logging, Prometheus metrics, backend health probes
//! - `gateway`: the axum server that ties everything together
//!
//! ### Re-exports
//! Commonly used types are re-exported at the crate root, so callers can write
//! `use health_gateway::GatewayError` instead of `use health_gateway::core::error::GatewayError`.

/// Core functionality including error types, configuration, and basic data structures
pub mod core;

/// Backend service registry with health state
pub mod discovery;

/// HTTP proxying and WebSocket relaying
pub mod protocols;

/// Gateway middleware: request correlation, rate limiting
pub mod middleware;

/// Bearer token decoding and the admin role gate
pub mod auth;

/// Cache store used by the admin dashboard
pub mod caching;

/// Admin dashboard aggregation and routes
pub mod admin;

/// Logging, metrics and backend health probes
pub mod observability;

/// Main gateway server implementation
pub mod gateway;

/// Main error type used throughout the gateway
pub use core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use core::config::GatewayConfig;

/// Server state and the main server struct
pub use gateway::server::{build_router, GatewayServer, ServerState};
