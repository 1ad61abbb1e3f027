pub mod middleware;
pub mod providers;

pub use middleware::{auth_middleware, require_admin};
pub use providers::{Claims, JwtDecoder};
