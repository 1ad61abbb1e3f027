// Structured logging
pub mod logging;

// Prometheus metrics
pub mod metrics;

// Active health probes
pub mod health;

pub use health::{HealthProbe, ProbeReport, ProbeResult};
pub use logging::init_logging;
pub use metrics::install_recorder;
