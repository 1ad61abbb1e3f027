//! # Structured Logging
//!
//! Subscriber setup for the gateway binary. JSON output for log shippers, text for local
//! development. `RUST_LOG` wins over the configured level when set.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogFormat, LoggingSettings};

/// Default filter when neither `RUST_LOG` nor a config level is usable
pub const DEFAULT_FILTER: &str = "health_gateway=info,tower_http=info";

/// Build the filter: `RUST_LOG` if set, else `{level}` for this crate and tower-http
pub fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = match settings.level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    EnvFilter::try_new(format!("health_gateway={level},tower_http={level}"))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. A second call is logged and ignored.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = build_filter(settings);

    let result = match settings.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    match result {
        Ok(()) => info!(level = %settings.level, format = ?settings.format, "Logging initialized"),
        Err(_) => warn!("Tracing subscriber already initialized, skipping initialization"),
    }
}
