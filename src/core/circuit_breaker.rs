//! Circuit Breaker Implementation
//!
//! One breaker per upstream service, consulted before every proxied call. The breaker is
//! load-shedding only; the registry's health flag is informational and evolves separately.
//!
//! ## States:
//! - **Closed**: calls pass, consecutive failures are counted
//! - **Open**: calls are rejected until `next_attempt_at`
//! - **HalfOpen**: the recovery window elapsed; one trial call is in flight and its outcome decides
//!
//! The Open → HalfOpen transition is lazy: nothing runs on a timer, the first caller after
//! `next_attempt_at` flips the state and owns the trial. Everyone else is rejected until the
//! trial reports through `on_success`/`on_failure` or hands the slot back with `release_trial`.
//! A trial that has been out for longer than the recovery timeout is treated as abandoned
//! (its caller was dropped) and the next caller takes over.
//!
//! ## Key Rust Concepts:
//! - `parking_lot::Mutex` guards the state so concurrent outcome reports never lose updates
//! - `AtomicU64` counters for lock-free metrics
//! - `DashMap` in the registry so lookups for different services never contend

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::error::{GatewayError, GatewayResult};

/// Circuit breaker state machine
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerState {
    /// Normal operation; tracks consecutive failures
    Closed { consecutive_failures: u32 },

    /// Rejecting calls until `next_attempt_at`
    Open {
        consecutive_failures: u32,
        next_attempt_at: Instant,
    },

    /// Recovery window elapsed, a single trial call is in flight
    HalfOpen {
        consecutive_failures: u32,
        trial_started_at: Instant,
    },
}

impl CircuitBreakerState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed { .. } => "CLOSED",
            Self::Open { .. } => "OPEN",
            Self::HalfOpen { .. } => "HALF_OPEN",
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        match *self {
            Self::Closed {
                consecutive_failures,
            }
            | Self::Open {
                consecutive_failures,
                ..
            }
            | Self::HalfOpen {
                consecutive_failures,
                ..
            } => consecutive_failures,
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call is allowed
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(60_000),
        }
    }
}

/// Counters collected by the circuit breaker
#[derive(Debug, Default)]
pub struct CircuitBreakerMetrics {
    pub successful_calls: AtomicU64,
    pub failed_calls: AtomicU64,
    pub rejected_calls: AtomicU64,
    pub times_opened: AtomicU64,
}

/// Point-in-time view of one breaker, safe to serialize into health responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub service: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    /// Milliseconds until a trial call is allowed (only while open)
    pub retry_in_ms: Option<u64>,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub times_opened: u64,
}

/// Per-service circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitBreakerState::Closed {
                consecutive_failures: 0,
            }),
            metrics: CircuitBreakerMetrics::default(),
        }
    }

    /// Create a circuit breaker with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Gate check before a call.
    ///
    /// Returns `CircuitOpen` while the breaker is open and the recovery window has not
    /// elapsed, and while another caller's trial is in flight. Flips Open → HalfOpen when the
    /// window has elapsed; the caller that flips it owns the trial.
    pub fn try_acquire(&self) -> GatewayResult<()> {
        let mut state = self.state.lock();
        let now = Instant::now();

        match *state {
            CircuitBreakerState::Closed { .. } => Ok(()),
            CircuitBreakerState::Open {
                consecutive_failures,
                next_attempt_at,
            } if now >= next_attempt_at => {
                *state = CircuitBreakerState::HalfOpen {
                    consecutive_failures,
                    trial_started_at: now,
                };
                info!(service = %self.name, "Circuit breaker HALF_OPEN, allowing trial call");
                Ok(())
            }
            CircuitBreakerState::HalfOpen {
                consecutive_failures,
                trial_started_at,
            } if now.duration_since(trial_started_at) >= self.config.recovery_timeout => {
                *state = CircuitBreakerState::HalfOpen {
                    consecutive_failures,
                    trial_started_at: now,
                };
                warn!(service = %self.name, "Abandoned trial call, handing the trial to a new caller");
                Ok(())
            }
            _ => {
                self.metrics.rejected_calls.fetch_add(1, Ordering::Relaxed);
                crate::observability::metrics::record_circuit_rejection(&self.name);
                Err(GatewayError::circuit_open(&self.name))
            }
        }
    }

    /// Give back a trial slot without an outcome.
    ///
    /// For calls that ended before reaching the upstream. The breaker returns to Open with
    /// the window already elapsed, so the next caller gets the trial. No-op unless half-open.
    pub fn release_trial(&self) {
        let mut state = self.state.lock();
        if let CircuitBreakerState::HalfOpen {
            consecutive_failures,
            ..
        } = *state
        {
            *state = CircuitBreakerState::Open {
                consecutive_failures,
                next_attempt_at: Instant::now(),
            };
            debug!(service = %self.name, "Trial call released without an outcome");
        }
    }

    /// Record a successful call: closes the circuit and zeroes the counter
    pub fn on_success(&self) {
        let mut state = self.state.lock();
        self.metrics.successful_calls.fetch_add(1, Ordering::Relaxed);

        if !matches!(*state, CircuitBreakerState::Closed { .. }) {
            info!(service = %self.name, "Circuit breaker CLOSED after successful call");
        }

        *state = CircuitBreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call; opens the circuit once the threshold is reached
    pub fn on_failure(&self) {
        let mut state = self.state.lock();
        self.metrics.failed_calls.fetch_add(1, Ordering::Relaxed);

        let failures = state.consecutive_failures().saturating_add(1);
        let trial_failed = matches!(*state, CircuitBreakerState::HalfOpen { .. });

        if trial_failed || failures >= self.config.failure_threshold {
            *state = CircuitBreakerState::Open {
                consecutive_failures: failures,
                next_attempt_at: Instant::now() + self.config.recovery_timeout,
            };
            self.metrics.times_opened.fetch_add(1, Ordering::Relaxed);
            warn!(
                service = %self.name,
                failure_count = failures,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker OPEN"
            );
        } else {
            *state = CircuitBreakerState::Closed {
                consecutive_failures: failures,
            };
        }
    }

    /// Run `call` through the breaker.
    ///
    /// `call` is never invoked while the circuit is open. An `Err` from `call` counts as a
    /// failure, an `Ok` as a success.
    pub async fn execute<F, Fut, T>(&self, call: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.try_acquire()?;

        match call().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitBreakerState {
        self.state.lock().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state();
        let retry_in_ms = match state {
            CircuitBreakerState::Open {
                next_attempt_at, ..
            } => Some(
                next_attempt_at
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
            ),
            _ => None,
        };

        CircuitBreakerSnapshot {
            service: self.name.clone(),
            state: state.label(),
            consecutive_failures: state.consecutive_failures(),
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout.as_millis() as u64,
            retry_in_ms,
            successful_calls: self.metrics.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.metrics.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.metrics.rejected_calls.load(Ordering::Relaxed),
            times_opened: self.metrics.times_opened.load(Ordering::Relaxed),
        }
    }
}

/// Lazily-populated set of breakers, one per service name
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_overrides(default_config, HashMap::new())
    }

    /// Per-service configs take precedence over the shared default
    pub fn with_overrides(
        default_config: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
    ) -> Self {
        Self {
            default_config,
            overrides,
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for `service`, creating it on first use
    pub fn get_or_create(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return Arc::clone(breaker.value());
        }

        let config = self
            .overrides
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());

        Arc::clone(
            self.breakers
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(service, config)))
                .value(),
        )
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| Arc::clone(b.value()))
    }

    /// Snapshots of every breaker created so far, sorted by service name
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
