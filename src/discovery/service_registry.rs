//! # Service Registry
//!
//! Static registry of the platform's backends, built from configuration at startup. Each
//! descriptor carries the routing facts the proxy needs (base URL, base path, aliases,
//! timeout) plus a live health record.
//!
//! ## Rust Concepts Used
//!
//! - `DashMap` for per-entry locking, so health updates on one service never block lookups
//!   on another
//! - `Arc<ServiceDescriptor>` so handlers hold a descriptor without cloning its strings
//! - `parking_lot::RwLock` around the mutable health record inside each descriptor

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::config::ServiceConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// Health state of one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Last known health of a backend
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            last_checked_at: None,
            last_error: None,
        }
    }
}

/// One logical backend
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub name: String,
    pub base_url: String,
    pub base_path: String,
    pub aliases: Vec<String>,
    pub timeout: Duration,
    pub websocket: bool,
    pub health_path: String,
    health: RwLock<ServiceHealth>,
}

impl ServiceDescriptor {
    pub fn from_config(name: impl Into<String>, config: &ServiceConfig) -> Self {
        Self {
            name: name.into(),
            base_url: config.url.trim_end_matches('/').to_string(),
            base_path: config.base_path.trim_end_matches('/').to_string(),
            aliases: config.aliases.clone(),
            timeout: config.timeout,
            websocket: config.websocket,
            health_path: config.health_path.clone(),
            health: RwLock::new(ServiceHealth::default()),
        }
    }

    /// Snapshot of the current health record
    pub fn health(&self) -> ServiceHealth {
        self.health.read().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.read().state == HealthState::Healthy
    }

    /// Whether `segment` names this service, directly or via an alias
    pub fn answers_to(&self, segment: &str) -> bool {
        self.name == segment || self.aliases.iter().any(|a| a == segment)
    }

    fn mark_healthy(&self) {
        let mut health = self.health.write();
        health.state = HealthState::Healthy;
        health.consecutive_failures = 0;
        health.last_checked_at = Some(Utc::now());
    }

    fn mark_unhealthy(&self, error: &str) {
        let mut health = self.health.write();
        health.state = HealthState::Unhealthy;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_checked_at = Some(Utc::now());
        health.last_error = Some(error.to_string());
    }
}

/// Serializable view of a descriptor for health and info endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    pub url: String,
    pub base_path: String,
    pub timeout_ms: u64,
    pub websocket: bool,
    pub health: ServiceHealth,
}

impl From<&ServiceDescriptor> for ServiceSummary {
    fn from(d: &ServiceDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            url: d.base_url.clone(),
            base_path: d.base_path.clone(),
            timeout_ms: d.timeout.as_millis() as u64,
            websocket: d.websocket,
            health: d.health(),
        }
    }
}

/// Registry of all backends, keyed by logical name
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceDescriptor>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the configured service table
    pub fn from_config<'a>(services: impl IntoIterator<Item = (&'a String, &'a ServiceConfig)>) -> Self {
        let registry = Self::new();
        for (name, config) in services {
            registry.register(ServiceDescriptor::from_config(name.as_str(), config));
        }
        registry
    }

    /// Register (or replace) a descriptor under its name
    pub fn register(&self, descriptor: ServiceDescriptor) {
        debug!(service = %descriptor.name, url = %descriptor.base_url, "Registered service");
        self.services
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> GatewayResult<Arc<ServiceDescriptor>> {
        self.services
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GatewayError::unknown_service(name))
    }

    pub fn mark_healthy(&self, name: &str) {
        match self.services.get(name) {
            Some(service) => service.mark_healthy(),
            None => warn!(service = name, "mark_healthy on unknown service"),
        }
    }

    pub fn mark_unhealthy(&self, name: &str, error: &str) {
        match self.services.get(name) {
            Some(service) => {
                service.mark_unhealthy(error);
                debug!(service = name, error, "Service marked unhealthy");
            }
            None => warn!(service = name, "mark_unhealthy on unknown service"),
        }
    }

    pub fn list_healthy(&self) -> Vec<Arc<ServiceDescriptor>> {
        let mut healthy: Vec<_> = self
            .services
            .iter()
            .filter(|entry| entry.value().is_healthy())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        healthy.sort_by(|a, b| a.name.cmp(&b.name));
        healthy
    }

    /// Every descriptor, sorted by name
    pub fn list_all(&self) -> Vec<Arc<ServiceDescriptor>> {
        let mut all: Vec<_> = self
            .services
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Service whose name or alias equals the given path segment
    pub fn resolve_segment(&self, segment: &str) -> Option<Arc<ServiceDescriptor>> {
        if let Some(direct) = self.services.get(segment) {
            return Some(Arc::clone(direct.value()));
        }
        self.services
            .iter()
            .find(|entry| entry.value().answers_to(segment))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// First service accepting relayed WebSocket upgrades, preferring `chat`
    pub fn websocket_target(&self) -> Option<Arc<ServiceDescriptor>> {
        self.services
            .get("chat")
            .filter(|chat| chat.websocket)
            .map(|chat| Arc::clone(chat.value()))
            .or_else(|| self.list_all().into_iter().find(|d| d.websocket))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::default_services;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::from_config(&default_services())
    }

    #[test]
    fn test_get_and_unknown_service() {
        let registry = registry();
        assert_eq!(registry.len(), 9);
        assert_eq!(registry.get("doctors").unwrap().base_path, "/api/doctors");

        let err = registry.get("pharmacy").unwrap_err();
        assert_eq!(err.status_code().as_u16(), 404);
    }

    #[test]
    fn test_health_transitions() {
        let registry = registry();
        registry.mark_unhealthy("billing", "connection refused");
        registry.mark_unhealthy("billing", "connection refused");

        let health = registry.get("billing").unwrap().health();
        assert_eq!(health.state, HealthState::Unhealthy);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.last_error.as_deref(), Some("connection refused"));
        assert!(!registry.list_healthy().iter().any(|d| d.name == "billing"));

        registry.mark_healthy("billing");
        let health = registry.get("billing").unwrap().health();
        assert_eq!(health.state, HealthState::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_checked_at.is_some());
    }

    #[test]
    fn test_marking_unknown_service_is_noop() {
        let registry = registry();
        registry.mark_unhealthy("pharmacy", "boom");
        registry.mark_healthy("pharmacy");
        assert_eq!(registry.list_healthy().len(), 9);
    }

    #[test]
    fn test_resolve_segment_by_alias() {
        let registry = registry();
        assert_eq!(registry.resolve_segment("notifications").unwrap().name, "notification");
        assert_eq!(registry.resolve_segment("notification").unwrap().name, "notification");
        assert_eq!(registry.resolve_segment("medicines").unwrap().name, "medicine");
        assert!(registry.resolve_segment("admin").is_none());
        assert_eq!(registry.websocket_target().unwrap().name, "chat");
    }
}
