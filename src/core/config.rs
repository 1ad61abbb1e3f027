//! # Configuration Management
//!
//! The gateway is configured from a single YAML document. Every section has defaults, so an
//! empty file (or no file at all) yields a gateway wired to the platform's standard local
//! service ports.
//!
//! ## Example
//!
//! ```yaml
//! server:
//!   bind_address: "0.0.0.0:3000"
//!   environment: production
//! services:
//!   notification:
//!     url: "http://notification:8088"
//!     base_path: "/device"
//!     aliases: ["notifications"]
//!     timeout: 5s
//! rate_limit:
//!   window: 15m
//!   max_requests: 100
//! cache:
//!   redis_url: "redis://redis:6379/0"
//! ```
//!
//! Environment variables override file values (`GATEWAY_*`, see [`GatewayConfig::apply_env_overrides`]).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::core::circuit_breaker::CircuitBreakerConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// Deployment environment, drives error detail exposure and admin rate-limit exemption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(GatewayError::config(format!("Unknown environment: {}", other))),
        }
    }
}

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerSettings,
    pub services: BTreeMap<String, ServiceConfig>,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub dashboard: DashboardSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    /// Value of the `X-Gateway-Name` header
    pub gateway_name: String,
    pub environment: Environment,
    #[serde(with = "humantime_serde")]
    pub graceful_shutdown_timeout: Duration,
    /// Interval of the background health probe; zero disables it
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Path whose upgrade requests are relayed to the chat backend
    pub websocket_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            gateway_name: "Smart Health API Gateway".to_string(),
            environment: Environment::Development,
            graceful_shutdown_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
            websocket_path: "/socket.io".to_string(),
        }
    }
}

/// One upstream backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
    /// Path prefix the backend expects, prepended after the gateway prefix is stripped
    #[serde(default)]
    pub base_path: String,
    /// Extra gateway path segments routed to this service (e.g. plural forms)
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_service_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Backend accepts relayed WebSocket upgrades
    #[serde(default)]
    pub websocket: bool,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_service_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_health_path() -> String {
    "/actuator/health".to_string()
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_path: base_path.into(),
            aliases: Vec::new(),
            timeout: default_service_timeout(),
            websocket: false,
            health_path: default_health_path(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_websocket(mut self) -> Self {
        self.websocket = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_requests: u64,
    /// Prefix of counter keys in the shared store
    pub key_prefix: String,
    /// Bound on each shared-store round trip; past it the local counters are used
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
    /// How often ended windows are dropped from the local counters
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
            key_prefix: "rl:".to_string(),
            store_timeout: Duration::from_millis(500),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    #[serde(flatten)]
    pub defaults: CircuitBreakerConfig,
    pub per_service: HashMap<String, CircuitBreakerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Redis connection string; absent means an in-process store
    pub redis_url: Option<String>,
    pub key_prefix: String,
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: String::new(),
            operation_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret used to decode bearer tokens; absent means every caller is anonymous
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    #[serde(with = "humantime_serde")]
    pub service_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,
    /// Sent as `X-Gateway-Secret` on internal admin calls
    pub gateway_secret: String,
    /// Lifetime of the cached headline stats
    #[serde(with = "humantime_serde")]
    pub stats_ttl: Duration,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            service_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(3),
            gateway_secret: "default-secret".to_string(),
            stats_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Backend table used when the config file does not list any services
pub fn default_services() -> BTreeMap<String, ServiceConfig> {
    let mut services = BTreeMap::new();
    services.insert(
        "auth".to_string(),
        ServiceConfig::new("http://localhost:8081", "/api/auth"),
    );
    services.insert(
        "patients".to_string(),
        ServiceConfig::new("http://localhost:8082", "/api/patients").with_aliases(&["patient"]),
    );
    services.insert(
        "doctors".to_string(),
        ServiceConfig::new("http://localhost:8083", "/api/doctors").with_aliases(&["doctor"]),
    );
    services.insert(
        "appointments".to_string(),
        ServiceConfig::new("http://localhost:8084", "/api/appointments")
            .with_aliases(&["appointment"]),
    );
    services.insert(
        "chat".to_string(),
        ServiceConfig::new("http://localhost:8085", "/api").with_websocket(),
    );
    services.insert(
        "prediction".to_string(),
        ServiceConfig::new("http://localhost:8086", "/api/v1"),
    );
    services.insert(
        "billing".to_string(),
        ServiceConfig::new("http://localhost:8087", "/api/v1/billing"),
    );
    services.insert(
        "notification".to_string(),
        ServiceConfig::new("http://localhost:8088", "/api/notifications")
            .with_aliases(&["notifications"]),
    );
    services.insert(
        "medicine".to_string(),
        ServiceConfig::new("http://localhost:8089", "/api/v1").with_aliases(&["medicines"]),
    );
    services
}

impl GatewayConfig {
    /// Load configuration from a YAML file, then apply env overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    /// Parse a YAML document, then apply env overrides and validate
    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        let mut config: GatewayConfig = if content.trim().is_empty() {
            GatewayConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?
        };

        config.fill_defaults();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in configuration with env overrides applied
    pub fn from_env() -> GatewayResult<Self> {
        let mut config = GatewayConfig::default();
        config.fill_defaults();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn fill_defaults(&mut self) {
        if self.services.is_empty() {
            self.services = default_services();
        }
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Recognized variables: `GATEWAY_BIND_ADDRESS`, `GATEWAY_ENV`, `GATEWAY_NAME`,
    /// `GATEWAY_REDIS_URL`, `GATEWAY_JWT_SECRET`, `GATEWAY_GATEWAY_SECRET`,
    /// `GATEWAY_RATE_LIMIT_MAX`, `GATEWAY_RATE_LIMIT_WINDOW`, `GATEWAY_LOG_LEVEL`,
    /// `GATEWAY_LOG_FORMAT`, and `GATEWAY_SERVICE_<NAME>_URL` for each configured service.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(addr) = env::var("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(environment) = env::var("GATEWAY_ENV") {
            self.server.environment = environment.parse()?;
        }

        if let Ok(name) = env::var("GATEWAY_NAME") {
            self.server.gateway_name = name;
        }

        if let Ok(url) = env::var("GATEWAY_REDIS_URL") {
            self.cache.redis_url = Some(url);
        }

        if let Ok(secret) = env::var("GATEWAY_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }

        if let Ok(secret) = env::var("GATEWAY_GATEWAY_SECRET") {
            self.dashboard.gateway_secret = secret;
        }

        if let Ok(max) = env::var("GATEWAY_RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = max
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_MAX: {}", e)))?;
        }

        if let Ok(window) = env::var("GATEWAY_RATE_LIMIT_WINDOW") {
            self.rate_limit.window = humantime::parse_duration(&window).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_WINDOW: {}", e))
            })?;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        for (name, service) in self.services.iter_mut() {
            let var = format!("GATEWAY_SERVICE_{}_URL", name.to_ascii_uppercase().replace('-', "_"));
            if let Ok(url) = env::var(&var) {
                service.url = url;
            }
        }

        Ok(())
    }

    /// Validate the whole document, reporting every problem at once
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "server.bind_address '{}' is not a socket address",
                self.server.bind_address
            ));
        }

        if self.services.is_empty() {
            errors.push("at least one service must be configured".to_string());
        }

        for (name, service) in &self.services {
            if service.url.trim().is_empty() {
                errors.push(format!("services.{}.url must not be empty", name));
            } else if let Err(e) = url::Url::parse(&service.url) {
                errors.push(format!("services.{}.url '{}' is invalid: {}", name, service.url, e));
            }

            if !service.base_path.is_empty() && !service.base_path.starts_with('/') {
                errors.push(format!("services.{}.base_path must start with '/'", name));
            }

            if service.timeout.is_zero() {
                errors.push(format!("services.{}.timeout must be greater than zero", name));
            }
        }

        if self.rate_limit.max_requests == 0 {
            errors.push("rate_limit.max_requests must be greater than zero".to_string());
        }

        if self.rate_limit.window.is_zero() {
            errors.push("rate_limit.window must be greater than zero".to_string());
        }

        if self.rate_limit.store_timeout.is_zero() {
            errors.push("rate_limit.store_timeout must be greater than zero".to_string());
        }

        if self.circuit_breaker.defaults.failure_threshold == 0 {
            errors.push("circuit_breaker.failure_threshold must be greater than zero".to_string());
        }

        for (name, cb) in &self.circuit_breaker.per_service {
            if cb.failure_threshold == 0 {
                errors.push(format!(
                    "circuit_breaker.per_service.{}.failure_threshold must be greater than zero",
                    name
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}
