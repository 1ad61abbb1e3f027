//! # Health Checking System
//!
//! Active probes against the backends' health endpoints. Results feed the
//! [`ServiceRegistry`] health records, which the proxy also updates passively from live
//! traffic.
//!
//! ## Key Features
//! - `probe(name)`: one `GET {base_url}{health_path}` bounded by the service timeout
//! - `probe_all()`: every registered service concurrently
//! - Background task re-probing on a fixed interval

use futures::future::join_all;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::core::error::GatewayResult;
use crate::discovery::{HealthState, ServiceRegistry};

/// Outcome of a single probe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub service: String,
    pub status: HealthState,
    pub response_time_ms: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Report for a probe of every service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub healthy: bool,
    pub healthy_count: usize,
    pub total_count: usize,
    pub services: Vec<ProbeResult>,
    pub timestamp: String,
}

/// Issues health probes and records the results in the registry
#[derive(Clone)]
pub struct HealthProbe {
    registry: Arc<ServiceRegistry>,
    client: HttpClient,
}

impl HealthProbe {
    pub fn new(registry: Arc<ServiceRegistry>, client: HttpClient) -> Self {
        Self { registry, client }
    }

    /// Probe one service; 404 `UnknownService` if it is not registered
    pub async fn probe(&self, name: &str) -> GatewayResult<ProbeResult> {
        let service = self.registry.get(name)?;
        let url = format!("{}{}", service.base_url, service.health_path);
        let started = Instant::now();

        let outcome = self
            .client
            .get(&url)
            .timeout(service.timeout)
            .send()
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(response) if response.status().as_u16() < 500 => {
                self.registry.mark_healthy(name);
                ProbeResult {
                    service: name.to_string(),
                    status: HealthState::Healthy,
                    response_time_ms,
                    url,
                    http_status: Some(response.status().as_u16()),
                    error: None,
                }
            }
            Ok(response) => {
                let message = format!("health endpoint returned {}", response.status());
                self.registry.mark_unhealthy(name, &message);
                ProbeResult {
                    service: name.to_string(),
                    status: HealthState::Unhealthy,
                    response_time_ms,
                    url,
                    http_status: Some(response.status().as_u16()),
                    error: Some(message),
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.registry.mark_unhealthy(name, &message);
                ProbeResult {
                    service: name.to_string(),
                    status: HealthState::Unhealthy,
                    response_time_ms,
                    url,
                    http_status: None,
                    error: Some(message),
                }
            }
        };

        debug!(service = name, status = ?result.status, elapsed_ms = response_time_ms, "Probed service");
        Ok(result)
    }

    /// Probe every registered service concurrently
    pub async fn probe_all(&self) -> ProbeReport {
        let names: Vec<String> = self
            .registry
            .list_all()
            .iter()
            .map(|d| d.name.clone())
            .collect();

        let services: Vec<ProbeResult> = join_all(names.iter().map(|name| self.probe(name)))
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect();

        let healthy_count = services.iter().filter(|r| r.is_healthy()).count();
        ProbeReport {
            healthy: healthy_count == services.len(),
            healthy_count,
            total_count: services.len(),
            services,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Re-probe every service on a fixed interval until the task is aborted
    pub fn spawn_background(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let report = self.probe_all().await;
                if report.healthy {
                    debug!(total = report.total_count, "Background health probe: all healthy");
                } else {
                    let down: Vec<&str> = report
                        .services
                        .iter()
                        .filter(|r| !r.is_healthy())
                        .map(|r| r.service.as_str())
                        .collect();
                    warn!(?down, "Background health probe found unhealthy services");
                }
            }
        })
    }
}

/// Log once at startup so operators can see the probe cadence
pub fn log_probe_schedule(every: Duration) {
    if every.is_zero() {
        info!("Background health probing disabled");
    } else {
        info!(interval = ?every, "Background health probing enabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServiceConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn registry_for(servers: &[(&str, &MockServer)]) -> Arc<ServiceRegistry> {
        let registry = ServiceRegistry::new();
        for (name, server) in servers {
            let config = ServiceConfig::new(server.uri(), "/api");
            registry.register(crate::discovery::ServiceDescriptor::from_config(*name, &config));
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_probe_marks_health() {
        let up = MockServer::start().await;
        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/actuator/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&up)
            .await;
        Mock::given(method("GET"))
            .and(path("/actuator/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&down)
            .await;

        let registry = registry_for(&[("doctors", &up), ("billing", &down)]).await;
        let probe = HealthProbe::new(Arc::clone(&registry), HttpClient::new());

        assert!(probe.probe("doctors").await.unwrap().is_healthy());
        let billing = probe.probe("billing").await.unwrap();
        assert!(!billing.is_healthy());
        assert_eq!(billing.http_status, Some(503));
        assert_eq!(
            registry.get("billing").unwrap().health().state,
            HealthState::Unhealthy
        );

        let report = probe.probe_all().await;
        assert!(!report.healthy);
        assert_eq!(report.healthy_count, 1);
        assert_eq!(report.total_count, 2);

        assert_eq!(probe.probe("nope").await.unwrap_err().status_code().as_u16(), 404);
    }
}
