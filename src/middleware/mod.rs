pub mod rate_limiting;
pub mod request_logging;

pub use rate_limiting::{rate_limit_middleware, TieredRateLimiter};
pub use request_logging::{request_context_middleware, RequestLogging};
