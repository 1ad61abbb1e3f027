//! # Metrics
//!
//! Prometheus exporter setup plus the small set of counters and histograms the
//! traffic-control layer records. Recording goes through the `metrics` facade, so when no
//! recorder is installed (tests, metrics disabled) every call is a no-op.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

use crate::core::config::MetricsSettings;

pub const PROXY_REQUESTS: &str = "gateway_proxy_requests_total";
pub const PROXY_DURATION: &str = "gateway_proxy_duration_seconds";
pub const CIRCUIT_REJECTIONS: &str = "gateway_circuit_rejections_total";
pub const RATE_LIMITED: &str = "gateway_rate_limited_total";
pub const DASHBOARD_CACHE: &str = "gateway_dashboard_cache_total";

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Metrics initialization error: {0}")]
    InitializationError(String),
}

/// Install the Prometheus recorder and return the render handle.
///
/// Returns `Ok(None)` when metrics are disabled.
pub fn install_recorder(settings: &MetricsSettings) -> Result<Option<PrometheusHandle>, MetricsError> {
    if !settings.enabled {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(PROXY_DURATION.to_string()), LATENCY_BUCKETS)
        .map_err(|e| MetricsError::InitializationError(format!("Failed to set histogram buckets: {}", e)))?
        .install_recorder()
        .map_err(|e| MetricsError::InitializationError(e.to_string()))?;

    Ok(Some(handle))
}

/// Outcome label for a proxied call
pub fn record_proxy(service: &str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(PROXY_REQUESTS, "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!(PROXY_DURATION, "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_circuit_rejection(service: &str) {
    metrics::counter!(CIRCUIT_REJECTIONS, "service" => service.to_string()).increment(1);
}

pub fn record_rate_limited(tier: &str) {
    metrics::counter!(RATE_LIMITED, "tier" => tier.to_string()).increment(1);
}

/// `kind` is the cache namespace (`stats`, `system_health`, ...), `hit` whether it was served from cache
pub fn record_dashboard_cache(kind: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!(DASHBOARD_CACHE, "kind" => kind.to_string(), "result" => result).increment(1);
}
