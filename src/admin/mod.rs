//! # Admin Module
//!
//! Admin dashboard for the platform: aggregated statistics from the backends, cached
//! lookups, system health, alerts and cache management.
//!
//! ## Security Considerations
//! Every route here requires the ADMIN role. The server applies
//! [`crate::auth::require_admin`] to the whole router; handlers do not re-check.
//!
//! ## Usage Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use health_gateway::admin::{AdminRouter, AdminState, DashboardAggregator};
//!
//! let state = AdminState { aggregator: Arc::new(aggregator) };
//! let admin = AdminRouter::create_router(state);
//! let app = axum::Router::new().nest("/v1/admin", admin);
//! ```

pub mod dashboard;
pub mod routes;

pub use dashboard::{DashboardAggregator, GatewayIdentity, LookupRoute, LOOKUPS};
pub use routes::{AdminRouter, AdminState};
