//! # Dashboard Aggregator
//!
//! Read-through cache in front of the backends' admin endpoints. Every dashboard view
//! follows the same shape:
//!
//! 1. look the view up in the [`CacheStore`] and return it with `fromCache: true` on a hit
//! 2. otherwise call one or more backends concurrently (settle-all, each call bounded by a
//!    timeout), merge the answers with fixed defaults, write the result back with the
//!    view's TTL, and return it with `fromCache: false`
//!
//! A failed backend never fails the view; it shows up as `false` in `serviceStatus` and its
//! fields fall back to defaults. The only error a view can return is a cache write that a
//! connected store rejected.
//!
//! ## Cache keys
//! | view                  | key                           | TTL    |
//! |-----------------------|-------------------------------|--------|
//! | stats                 | `admin:stats:v1`              | `dashboard.stats_ttl` (30 s) |
//! | system health         | `admin:system:health`         | 5 s    |
//! | alerts                | `admin:alerts:active`         | 10 s   |
//! | revenue analytics     | `admin:revenue:analytics:{period}:{days}` | 60 s |
//! | single-backend lookup | see [`LOOKUPS`]               | varies |

use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::caching::CacheStore;
use crate::core::circuit_breaker::CircuitBreakerRegistry;
use crate::core::config::{DashboardSettings, GatewayConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::{HealthState, ServiceRegistry};
use crate::observability::metrics::record_dashboard_cache;

pub const STATS_KEY: &str = "admin:stats:v1";
pub const SYSTEM_HEALTH_KEY: &str = "admin:system:health";
pub const ALERTS_KEY: &str = "admin:alerts:active";
/// Rendered from the same parameters the trends call forwards
pub const REVENUE_ANALYTICS_KEY: &str = "admin:revenue:analytics:{period}:{days}";

const SYSTEM_HEALTH_TTL: Duration = Duration::from_secs(5);
const ALERTS_TTL: Duration = Duration::from_secs(10);
const REVENUE_ANALYTICS_TTL: Duration = Duration::from_secs(60);

/// Services probed by the system health view
pub const HEALTH_SERVICES: &[&str] = &[
    "patients",
    "doctors",
    "appointments",
    "billing",
    "medicine",
    "notification",
];

/// One backend feeding the stats view: `(status key, service, stats path)`
const STATS_SOURCES: &[(&str, &str, &str)] = &[
    ("patients", "patients", "/v1/admin/patients/stats"),
    ("doctors", "doctors", "/v1/admin/doctors/stats"),
    ("appointments", "appointments", "/v1/admin/appointments/stats"),
    ("revenue", "billing", "/api/v1/admin/billing/revenue/stats"),
    ("medicine", "medicine", "/v1/admin/medicines/stats"),
];

/// Default for a missing stats field
#[derive(Debug, Clone, Copy)]
enum Fallback {
    Zero,
    NotAvailable,
}

/// `(output field, status key of the source, JSON path in the source payload, fallback)`
const STATS_FIELDS: &[(&str, &str, &str, Fallback)] = &[
    ("totalPatients", "patients", "data.totalPatients", Fallback::Zero),
    ("activePatients", "patients", "data.activePatients", Fallback::Zero),
    ("newPatientsThisMonth", "patients", "data.newThisMonth", Fallback::Zero),
    ("mostCommonGender", "patients", "data.mostCommonGender", Fallback::NotAvailable),
    ("totalDoctors", "doctors", "data.totalDoctors", Fallback::Zero),
    ("activeDoctors", "doctors", "data.activeDoctors", Fallback::Zero),
    ("onlineDoctors", "doctors", "data.onlineNow", Fallback::Zero),
    ("todayAppointments", "appointments", "data.totalToday", Fallback::Zero),
    ("completedAppointments", "appointments", "data.completed", Fallback::Zero),
    ("pendingAppointments", "appointments", "data.pending", Fallback::Zero),
    ("confirmedAppointments", "appointments", "data.confirmed", Fallback::Zero),
    ("cancelledAppointments", "appointments", "data.cancelled", Fallback::Zero),
    ("mostCommonAppointmentType", "appointments", "data.mostCommonType", Fallback::NotAvailable),
    ("revenueToday", "revenue", "data.todayRevenue", Fallback::Zero),
    ("revenueMonth", "revenue", "data.monthRevenue", Fallback::Zero),
    ("revenueYear", "revenue", "data.yearRevenue", Fallback::Zero),
    ("totalMedicines", "medicine", "data.totalMedicines", Fallback::Zero),
    ("lowStockMedicines", "medicine", "data.lowStock", Fallback::Zero),
];

/// A single-backend cached lookup
#[derive(Debug, Clone, Copy)]
pub struct LookupRoute {
    /// Route under `/v1/admin/dashboard/`
    pub route: &'static str,
    pub service: &'static str,
    pub path: &'static str,
    /// Cache key with `{param}` placeholders
    pub key: &'static str,
    pub ttl_secs: u64,
}

impl LookupRoute {
    /// Query parameters this lookup forwards (those named in its key)
    pub fn params(&self) -> impl Iterator<Item = &'static str> + '_ {
        LOOKUP_PARAMS
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| self.key.contains(&format!("{{{}}}", name)))
    }
}

/// Recognized lookup parameters and their defaults
pub const LOOKUP_PARAMS: &[(&str, &str)] = &[
    ("period", "daily"),
    ("days", "30"),
    ("page", "1"),
    ("limit", "10"),
];

pub const LOOKUPS: &[LookupRoute] = &[
    LookupRoute { route: "appointments/trends", service: "appointments", path: "/v1/admin/appointments/trends", key: "admin:appointments:trends:{period}:{days}", ttl_secs: 60 },
    LookupRoute { route: "appointments/distribution", service: "appointments", path: "/v1/admin/appointments/status-distribution", key: "admin:appointments:distribution", ttl_secs: 60 },
    LookupRoute { route: "appointments/recent", service: "appointments", path: "/v1/admin/appointments/recent", key: "admin:appointments:recent:{page}:{limit}", ttl_secs: 30 },
    LookupRoute { route: "patients/growth", service: "patients", path: "/v1/admin/patients/growth", key: "admin:patients:growth:{period}:{days}", ttl_secs: 3600 },
    LookupRoute { route: "patients/demographics", service: "patients", path: "/v1/admin/patients/demographics", key: "admin:patients:demographics", ttl_secs: 3600 },
    LookupRoute { route: "patients/recent", service: "patients", path: "/v1/admin/patients/recent", key: "admin:patients:recent:{page}:{limit}", ttl_secs: 30 },
    LookupRoute { route: "doctors/stats", service: "doctors", path: "/v1/admin/doctors/stats", key: "admin:doctors:stats", ttl_secs: 30 },
    LookupRoute { route: "doctors/top", service: "doctors", path: "/v1/admin/doctors/top", key: "admin:doctors:top:{limit}", ttl_secs: 600 },
    LookupRoute { route: "doctors/departments/performance", service: "doctors", path: "/v1/admin/doctors/departments/performance", key: "admin:doctors:departments", ttl_secs: 600 },
    LookupRoute { route: "revenue/stats", service: "billing", path: "/api/v1/admin/billing/revenue/stats", key: "admin:revenue:stats", ttl_secs: 30 },
    LookupRoute { route: "revenue/distribution", service: "billing", path: "/api/v1/admin/billing/revenue/distribution", key: "admin:revenue:distribution", ttl_secs: 60 },
    LookupRoute { route: "revenue/trends", service: "billing", path: "/api/v1/admin/billing/revenue/trends", key: "admin:revenue:trends:{period}:{days}", ttl_secs: 60 },
    LookupRoute { route: "payment-methods/stats", service: "billing", path: "/api/v1/admin/billing/payment-methods/stats", key: "admin:payments:methods", ttl_secs: 60 },
];

pub fn find_lookup(route: &str) -> Option<&'static LookupRoute> {
    let route = route.trim_matches('/');
    LOOKUPS.iter().find(|entry| entry.route == route)
}

/// Resolved parameters: request value if present, else the default
fn resolve_params(entry: &LookupRoute, query: &HashMap<String, String>) -> Vec<(&'static str, String)> {
    entry.params()
        .map(|name| {
            let default = LOOKUP_PARAMS
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, d)| *d)
                .unwrap_or_default();
            let value = query
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default);
            (name, value.to_string())
        })
        .collect()
}

fn render_key(template: &str, params: &[(&str, String)]) -> String {
    params.iter().fold(template.to_string(), |key, (name, value)| {
        key.replace(&format!("{{{}}}", name), value)
    })
}

fn render_query(params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        serializer.append_pair(name, value);
    }
    format!("?{}", serializer.finish())
}

/// Value at a dotted path such as `data.totalPatients`
fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |node, key| node.get(key))
}

fn fallback_value(found: Option<&Value>, fallback: Fallback) -> Value {
    match fallback {
        Fallback::Zero => match found {
            Some(Value::Number(n)) => Value::Number(n.clone()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| json!(0)),
            _ => json!(0),
        },
        Fallback::NotAvailable => match found {
            Some(Value::String(s)) if !s.is_empty() => json!(s),
            _ => json!("N/A"),
        },
    }
}

/// `data` if the payload wraps one, otherwise the payload itself
fn detail(payload: Option<&Value>) -> Value {
    match payload {
        Some(p) => p.get("data").cloned().unwrap_or_else(|| p.clone()),
        None => Value::Null,
    }
}

/// Merge stats payloads (keyed by status key) into the flat stats record
pub fn merge_stats(payloads: &HashMap<&str, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (field, source, path, fallback) in STATS_FIELDS {
        let found = payloads.get(source).and_then(|p| lookup_path(p, path));
        out.insert((*field).to_string(), fallback_value(found, *fallback));
    }

    let mut status = Map::new();
    for (key, _, _) in STATS_SOURCES {
        out.insert((*key).to_string(), detail(payloads.get(key)));
        status.insert((*key).to_string(), json!(payloads.contains_key(key)));
    }

    let partial = status.values().any(|ok| ok == &json!(false));
    out.insert("serviceStatus".into(), Value::Object(status));
    out.insert("partial".into(), json!(partial));
    out
}

/// `1d 2h 3m 4s`; zero days, hours and minutes are omitted
pub fn format_uptime(total: Duration) -> String {
    let secs = total.as_secs();
    let (days, hours, minutes, seconds) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60, secs % 60);

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));
    parts.join(" ")
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Static facts about this gateway instance for the system info view
#[derive(Debug, Clone)]
pub struct GatewayIdentity {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub bind_address: String,
}

impl GatewayIdentity {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            name: config.server.gateway_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: config.server.environment.as_str().to_string(),
            bind_address: config.server.bind_address.clone(),
        }
    }
}

/// Admin dashboard aggregation over the backends' admin endpoints
pub struct DashboardAggregator {
    client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: CacheStore,
    settings: DashboardSettings,
    identity: GatewayIdentity,
    started_at: Instant,
}

impl DashboardAggregator {
    pub fn new(
        client: reqwest::Client,
        registry: Arc<ServiceRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: CacheStore,
        settings: DashboardSettings,
        identity: GatewayIdentity,
    ) -> Self {
        Self {
            client,
            registry,
            breakers,
            cache,
            settings,
            identity,
            started_at: Instant::now(),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// GET a backend admin endpoint. Transport errors, timeouts, non-2xx and bad JSON all fail.
    async fn call_backend(&self, service: &str, path_and_query: &str) -> Result<Value, String> {
        let descriptor = self.registry.get(service).map_err(|e| e.to_string())?;
        let url = format!("{}{}", descriptor.base_url, path_and_query);

        let response = self
            .client
            .get(&url)
            .header("X-Internal-Request", "true")
            .header("X-Gateway-Secret", self.settings.gateway_secret.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.settings.service_timeout)
            .send()
            .await
            .map_err(|e| format!("{} request failed: {}", service, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned {}", service, status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| format!("{} returned invalid JSON: {}", service, e))
    }

    /// Cache-aside around `compute`; the result must be a JSON object
    async fn cached<F, Fut>(&self, kind: &str, key: &str, ttl: Duration, compute: F) -> GatewayResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (Map<String, Value>, bool)>,
    {
        if let Some(Value::Object(mut hit)) = self.cache.get_json::<Value>(key).await {
            record_dashboard_cache(kind, true);
            hit.insert("fromCache".into(), json!(true));
            return Ok(Value::Object(hit));
        }
        record_dashboard_cache(kind, false);

        let (mut fresh, cacheable) = compute().await;
        fresh.insert("fromCache".into(), json!(false));
        let value = Value::Object(fresh);
        if cacheable {
            self.cache.set_json(key, &value, ttl).await?;
        }
        Ok(value)
    }

    /// Dashboard headline numbers from five backends
    #[instrument(skip(self))]
    pub async fn get_aggregated_stats(&self) -> GatewayResult<Value> {
        self.cached("stats", STATS_KEY, self.settings.stats_ttl, || async {
            let started = Instant::now();
            let calls = STATS_SOURCES
                .iter()
                .map(|(key, service, path)| async move { (*key, self.call_backend(service, path).await) });

            let mut payloads = HashMap::new();
            for (key, outcome) in join_all(calls).await {
                match outcome {
                    Ok(payload) => {
                        payloads.insert(key, payload);
                    }
                    Err(e) => warn!(source = key, error = %e, "Dashboard stats source failed"),
                }
            }

            let mut stats = merge_stats(&payloads);
            stats.insert("timestamp".into(), json!(now_rfc3339()));
            stats.insert("responseTimeMs".into(), json!(started.elapsed().as_millis() as u64));
            info!(
                sources_ok = payloads.len(),
                sources_total = STATS_SOURCES.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Aggregated dashboard stats"
            );
            (stats, true)
        })
        .await
    }

    /// Single-backend cached lookup; `data` is null when the backend failed
    #[instrument(skip(self, query), fields(route = entry.route))]
    pub async fn lookup(&self, entry: &LookupRoute, query: &HashMap<String, String>) -> GatewayResult<Value> {
        let params = resolve_params(entry, query);
        let key = render_key(entry.key, &params);
        let path = format!("{}{}", entry.path, render_query(&params));
        let ttl = Duration::from_secs(entry.ttl_secs);

        self.cached(entry.route, &key, ttl, || async {
            let outcome = self.call_backend(entry.service, &path).await;
            let available = outcome.is_ok();
            let data = match outcome {
                Ok(payload) => detail(Some(&payload)),
                Err(e) => {
                    warn!(service = entry.service, error = %e, "Dashboard lookup failed");
                    Value::Null
                }
            };

            let mut out = Map::new();
            out.insert("data".into(), data);
            out.insert("available".into(), json!(available));
            out.insert("timestamp".into(), json!(now_rfc3339()));
            // Failures are not cached so the next request retries the backend
            (out, available)
        })
        .await
    }

    /// Billing revenue stats, distribution, trends and payment methods in one view
    #[instrument(skip(self, query))]
    pub async fn revenue_analytics(&self, query: &HashMap<String, String>) -> GatewayResult<Value> {
        let trends_params = find_lookup("revenue/trends")
            .map(|entry| resolve_params(entry, query))
            .unwrap_or_default();
        let trends_query = render_query(&trends_params);
        let key = render_key(REVENUE_ANALYTICS_KEY, &trends_params);

        let sources: Vec<(&str, String)> = vec![
            ("stats", "/api/v1/admin/billing/revenue/stats".to_string()),
            ("distribution", "/api/v1/admin/billing/revenue/distribution".to_string()),
            ("trends", format!("/api/v1/admin/billing/revenue/trends{}", trends_query)),
            ("paymentMethods", "/api/v1/admin/billing/payment-methods/stats".to_string()),
        ];

        self.cached("revenue_analytics", &key, REVENUE_ANALYTICS_TTL, || async {
            let calls = sources.iter().map(|(name, path)| async move {
                (*name, self.call_backend("billing", path).await)
            });

            let mut out = Map::new();
            let mut status = Map::new();
            for (name, outcome) in join_all(calls).await {
                let ok = outcome.is_ok();
                let value = match outcome {
                    Ok(payload) => detail(Some(&payload)),
                    Err(e) => {
                        warn!(part = name, error = %e, "Revenue analytics source failed");
                        Value::Null
                    }
                };
                out.insert(name.to_string(), value);
                status.insert(name.to_string(), json!(ok));
            }

            let partial = status.values().any(|ok| ok == &json!(false));
            out.insert("serviceStatus".into(), Value::Object(status));
            out.insert("partial".into(), json!(partial));
            out.insert("timestamp".into(), json!(now_rfc3339()));
            (out, true)
        })
        .await
    }

    async fn probe_health(&self, service: &str) -> Value {
        let Ok(descriptor) = self.registry.get(service) else {
            return json!({
                "name": service,
                "status": "unhealthy",
                "responseTimeMs": 0,
                "url": Value::Null,
                "error": "service not registered",
            });
        };

        let url = format!("{}/health", descriptor.base_url);
        let started = Instant::now();
        let outcome = self
            .client
            .get(&url)
            .header("X-Internal-Request", "true")
            .timeout(self.settings.health_timeout)
            .send()
            .await;
        let elapsed = started.elapsed().as_millis() as u64;

        let mut entry = Map::new();
        entry.insert("name".into(), json!(service));
        entry.insert("responseTimeMs".into(), json!(elapsed));
        entry.insert("url".into(), json!(descriptor.base_url));

        match outcome {
            Ok(response) if response.status().is_success() => {
                entry.insert("status".into(), json!("healthy"));
                if let Ok(details) = response.json::<Value>().await {
                    entry.insert("details".into(), details);
                }
            }
            Ok(response) => {
                entry.insert("status".into(), json!("unhealthy"));
                entry.insert("error".into(), json!(format!("health endpoint returned {}", response.status())));
            }
            Err(e) => {
                entry.insert("status".into(), json!("unhealthy"));
                entry.insert("error".into(), json!(e.to_string()));
            }
        }
        Value::Object(entry)
    }

    /// Health of the platform's core services; `overall` is healthy, degraded or critical
    #[instrument(skip(self))]
    pub async fn system_health(&self) -> GatewayResult<Value> {
        self.cached("system_health", SYSTEM_HEALTH_KEY, SYSTEM_HEALTH_TTL, || async {
            let services = join_all(HEALTH_SERVICES.iter().map(|s| self.probe_health(s))).await;
            let total = services.len();
            let healthy = services
                .iter()
                .filter(|s| s.get("status") == Some(&json!("healthy")))
                .count();

            let overall = if healthy == total {
                "healthy"
            } else if healthy == 0 {
                "critical"
            } else {
                "degraded"
            };
            let percentage = if total == 0 {
                100
            } else {
                ((healthy as f64 / total as f64) * 100.0).round() as u64
            };

            let mut out = Map::new();
            out.insert("overall".into(), json!(overall));
            out.insert("healthyCount".into(), json!(healthy));
            out.insert("totalCount".into(), json!(total));
            out.insert("healthPercentage".into(), json!(percentage));
            out.insert("services".into(), Value::Array(services));
            out.insert("timestamp".into(), json!(now_rfc3339()));
            (out, true)
        })
        .await
    }

    /// Alerts derived from breaker states and registry health
    #[instrument(skip(self))]
    pub async fn active_alerts(&self) -> GatewayResult<Value> {
        self.cached("alerts", ALERTS_KEY, ALERTS_TTL, || async {
            let now = now_rfc3339();
            let mut critical = Vec::new();
            let mut warning = Vec::new();
            let mut info_alerts = Vec::new();

            for breaker in self.breakers.snapshots() {
                match breaker.state {
                    "OPEN" => critical.push(json!({
                        "type": "circuit_open",
                        "service": breaker.service,
                        "message": format!("Circuit breaker open for {}", breaker.service),
                        "retryInMs": breaker.retry_in_ms,
                        "timestamp": now,
                    })),
                    "HALF_OPEN" => info_alerts.push(json!({
                        "type": "circuit_half_open",
                        "service": breaker.service,
                        "message": format!("Circuit breaker for {} is testing recovery", breaker.service),
                        "timestamp": now,
                    })),
                    _ => {}
                }
            }

            for service in self.registry.list_all() {
                let health = service.health();
                if health.state == HealthState::Unhealthy {
                    warning.push(json!({
                        "type": "service_unhealthy",
                        "service": service.name,
                        "message": format!("{} is unhealthy", service.name),
                        "consecutiveFailures": health.consecutive_failures,
                        "lastError": health.last_error,
                        "timestamp": now,
                    }));
                }
            }

            let total = critical.len() + warning.len() + info_alerts.len();
            debug!(total, "Computed active alerts");

            let mut out = Map::new();
            out.insert("critical".into(), Value::Array(critical));
            out.insert("warning".into(), Value::Array(warning));
            out.insert("info".into(), Value::Array(info_alerts));
            out.insert("total".into(), json!(total));
            out.insert("timestamp".into(), json!(now));
            (out, true)
        })
        .await
    }

    /// Gateway identity, configured services, cache backend and uptime. Never cached.
    pub async fn system_info(&self) -> Value {
        let uptime = self.started_at.elapsed();
        let services: Vec<Value> = self
            .registry
            .list_all()
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "url": d.base_url,
                    "timeout_ms": d.timeout.as_millis() as u64,
                })
            })
            .collect();

        json!({
            "gateway": {
                "name": self.identity.name,
                "version": self.identity.version,
                "environment": self.identity.environment,
                "bindAddress": self.identity.bind_address,
            },
            "services": services,
            "cache": {
                "backend": self.cache.kind(),
                "connected": self.cache.is_connected().await,
            },
            "uptime": {
                "seconds": uptime.as_secs(),
                "formatted": format_uptime(uptime),
            },
        })
    }

    /// Delete every key matching `pattern`; zero matches is not an error
    #[instrument(skip(self))]
    pub async fn invalidate(&self, pattern: &str) -> GatewayResult<u64> {
        self.cache.delete_pattern(pattern).await.map_err(GatewayError::from)
    }

    pub async fn cache_stats(&self) -> Value {
        self.cache.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_stats_defaults_for_missing_sources() {
        let mut payloads = HashMap::new();
        payloads.insert("patients", json!({"data": {"totalPatients": 12, "mostCommonGender": "FEMALE"}}));
        payloads.insert("revenue", json!({"data": {"todayRevenue": "150.5"}}));

        let stats = merge_stats(&payloads);
        assert_eq!(stats["totalPatients"], 12);
        assert_eq!(stats["activePatients"], 0);
        assert_eq!(stats["mostCommonGender"], "FEMALE");
        assert_eq!(stats["mostCommonAppointmentType"], "N/A");
        assert_eq!(stats["revenueToday"], 150.5);
        assert_eq!(stats["doctors"], Value::Null);
        assert_eq!(stats["patients"]["totalPatients"], 12);
        assert_eq!(stats["serviceStatus"]["patients"], true);
        assert_eq!(stats["serviceStatus"]["doctors"], false);
        assert_eq!(stats["partial"], true);
    }

    #[test]
    fn test_uptime_format() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(3600)), "1h 0s");
        assert_eq!(format_uptime(Duration::from_secs(93_784)), "1d 2h 3m 4s");
    }

    #[test]
    fn test_lookup_keys_and_queries() {
        let entry = find_lookup("appointments/trends").unwrap();
        let mut query = HashMap::new();
        query.insert("days".to_string(), "7".to_string());
        query.insert("ignored".to_string(), "x".to_string());

        let params = resolve_params(entry, &query);
        assert_eq!(render_key(entry.key, &params), "admin:appointments:trends:daily:7");
        assert_eq!(render_query(&params), "?period=daily&days=7");

        let top = find_lookup("/doctors/top/").unwrap();
        let params = resolve_params(top, &HashMap::new());
        assert_eq!(render_key(top.key, &params), "admin:doctors:top:10");

        let fixed = find_lookup("patients/demographics").unwrap();
        assert_eq!(render_query(&resolve_params(fixed, &HashMap::new())), "");
        assert!(find_lookup("patients/unknown").is_none());
    }
}
