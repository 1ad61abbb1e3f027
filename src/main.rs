//! # Health Gateway - Main Entry Point
//!
//! Startup sequence:
//! 1. load configuration (`GATEWAY_CONFIG_PATH`, default `config/gateway.yaml`; built-in
//!    defaults plus environment overrides when the file does not exist)
//! 2. initialize structured logging and the Prometheus recorder
//! 3. connect the cache; an unreachable Redis leaves the gateway running in degraded mode
//! 4. build the server and serve until Ctrl-C or SIGTERM

use anyhow::Context;
use std::path::Path;
use tracing::{info, warn};

use health_gateway::caching::CacheStore;
use health_gateway::observability::{init_logging, install_recorder};
use health_gateway::{GatewayConfig, GatewayServer, ServerState};

const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let (config, from_file) = load_config(&config_path).await?;

    init_logging(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting health gateway");
    if from_file {
        info!(path = %config_path, "Configuration loaded");
    } else {
        warn!(path = %config_path, "Config file not found, using built-in defaults with env overrides");
    }

    let prometheus = install_recorder(&config.metrics).context("failed to install metrics recorder")?;
    if prometheus.is_some() {
        info!(path = %config.metrics.path, "Prometheus metrics enabled");
    }

    let cache = CacheStore::connect(&config.cache).await;
    if !cache.is_enabled() {
        warn!("Cache unavailable, dashboard views will be computed on every request");
    }

    let state = ServerState::new(config, cache, prometheus).context("failed to build gateway state")?;
    let server = GatewayServer::new(state);
    server.start().await.context("gateway server failed")?;

    info!("Health gateway shutdown complete");
    Ok(())
}

async fn load_config(path: &str) -> anyhow::Result<(GatewayConfig, bool)> {
    if Path::new(path).exists() {
        let config = GatewayConfig::load_from_file(path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path))?;
        Ok((config, true))
    } else {
        let config = GatewayConfig::from_env().context("failed to build configuration from environment")?;
        Ok((config, false))
    }
}
