//! Per-route circuit breaker.
//!
//! Stops dispatching to a backend that keeps failing and periodically
//! probes it for recovery.
//!
//! # Circuit Breaker States
//!
//! ```text
//!                 success (counter reset)
//!               ┌───────┐
//!               ▼       │
//!         ┌──────────┐──┘  F consecutive   ┌──────────┐
//!         │  CLOSED  │ ───── failures ───► │   OPEN   │ ◄──┐
//!         │(dispatch)│                     │ (refuse) │    │
//!         └──────────┘                     └──────────┘    │
//!               ▲                    cooldown T │          │ trial
//!               │                       elapsed ▼          │ fails
//!               │   trial succeeds     ┌──────────┐        │
//!               └───────────────────── │HALF-OPEN │ ───────┘
//!                                      │(1 trial) │
//!                                      └──────────┘
//! ```
//!
//! Admission hands out a [`CallPermit`]. Consuming the permit with
//! [`CallPermit::record_success`] or [`CallPermit::record_failure`] feeds the
//! outcome into the state machine exactly once. A permit dropped without an
//! outcome (cancelled request) records nothing; a dropped trial permit frees
//! the half-open slot for the next caller.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::config::CircuitBreakerConfig;
use crate::domain::GatewayError;
use crate::ports::Clock;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// One trial request probes the backend
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-route health
struct RouteCircuit {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_transition: Instant,
    /// Bumped on every transition; permits from an older period are stale
    generation: u64,
    trial_in_flight: bool,
    total_requests: u64,
    total_failures: u64,
    total_rejected: u64,
}

impl RouteCircuit {
    fn new(config: CircuitBreakerConfig, now: Instant) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_transition: now,
            generation: 0,
            trial_in_flight: false,
            total_requests: 0,
            total_failures: 0,
            total_rejected: 0,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.last_transition = now;
        self.generation += 1;
        self.trial_in_flight = false;
        match to {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
            }
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::HalfOpen => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Trial,
}

/// Permission to dispatch one request to a route.
#[must_use = "a permit should be settled with record_success or record_failure"]
pub struct CallPermit<'a> {
    manager: &'a CircuitBreakerManager,
    route: String,
    kind: PermitKind,
    generation: u64,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this is the half-open probe
    pub fn is_trial(&self) -> bool {
        self.kind == PermitKind::Trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.manager.on_outcome(&self.route, self.kind, self.generation, true);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.manager.on_outcome(&self.route, self.kind, self.generation, false);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.kind == PermitKind::Trial {
            self.manager.on_abandoned_trial(&self.route, self.generation);
        }
    }
}

/// Circuit breaker manager for all routes
pub struct CircuitBreakerManager {
    circuits: DashMap<String, RouteCircuit>,
    /// Policy for routes that were never registered
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: DashMap::new(),
            default_config,
            clock,
        }
    }

    /// Install a route with its own policy (resets any existing state)
    pub fn register(&self, route: &str, config: CircuitBreakerConfig) {
        self.circuits
            .insert(route.to_string(), RouteCircuit::new(config, self.clock.now()));
    }

    /// Ask to dispatch to `route`.
    ///
    /// Fails with [`GatewayError::CircuitOpen`] while the circuit is open and
    /// its cooldown has not elapsed, or while a half-open trial is in flight.
    pub fn try_acquire(&self, route: &str) -> Result<CallPermit<'_>, GatewayError> {
        let mut circuit = self
            .circuits
            .entry(route.to_string())
            .or_insert_with(|| RouteCircuit::new(self.default_config.clone(), self.clock.now()));
        let now = self.clock.now();

        let kind = if !circuit.config.enabled {
            Some(PermitKind::Normal)
        } else {
            match circuit.state {
                CircuitState::Closed => Some(PermitKind::Normal),
                CircuitState::Open => {
                    let opened_at = circuit.opened_at.unwrap_or(circuit.last_transition);
                    if now.saturating_duration_since(opened_at) >= circuit.config.open_timeout {
                        info!(route = route, "Circuit breaker transitioning to half-open");
                        circuit.transition(CircuitState::HalfOpen, now);
                        circuit.trial_in_flight = true;
                        Some(PermitKind::Trial)
                    } else {
                        debug!(
                            route = route,
                            remaining_ms = (circuit.config.open_timeout
                                - now.saturating_duration_since(opened_at))
                            .as_millis(),
                            "Circuit breaker is open, rejecting request"
                        );
                        None
                    }
                }
                CircuitState::HalfOpen if circuit.trial_in_flight => None,
                CircuitState::HalfOpen => {
                    circuit.trial_in_flight = true;
                    Some(PermitKind::Trial)
                }
            }
        };

        match kind {
            Some(kind) => {
                circuit.total_requests += 1;
                Ok(CallPermit {
                    manager: self,
                    route: route.to_string(),
                    kind,
                    generation: circuit.generation,
                    settled: false,
                })
            }
            None => {
                circuit.total_rejected += 1;
                Err(GatewayError::CircuitOpen {
                    route: route.to_string(),
                })
            }
        }
    }

    fn on_outcome(&self, route: &str, kind: PermitKind, generation: u64, success: bool) {
        let Some(mut circuit) = self.circuits.get_mut(route) else {
            return;
        };
        if !success {
            circuit.total_failures += 1;
        }
        if !circuit.config.enabled {
            return;
        }
        if circuit.generation != generation {
            debug!(route = route, "Ignoring outcome from a previous circuit period");
            return;
        }

        let now = self.clock.now();
        match (kind, circuit.state, success) {
            (PermitKind::Normal, CircuitState::Closed, true) => {
                circuit.consecutive_failures = 0;
            }
            (PermitKind::Normal, CircuitState::Closed, false) => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= circuit.config.failure_threshold {
                    warn!(
                        route = route,
                        failures = circuit.consecutive_failures,
                        threshold = circuit.config.failure_threshold,
                        timeout_ms = circuit.config.open_timeout.as_millis(),
                        "Circuit breaker opening due to failures"
                    );
                    circuit.transition(CircuitState::Open, now);
                }
            }
            (PermitKind::Trial, CircuitState::HalfOpen, true) => {
                info!(route = route, "Circuit breaker closing after successful trial");
                circuit.transition(CircuitState::Closed, now);
            }
            (PermitKind::Trial, CircuitState::HalfOpen, false) => {
                warn!(route = route, "Circuit breaker reopening after trial failure");
                circuit.transition(CircuitState::Open, now);
            }
            _ => {}
        }
    }

    fn on_abandoned_trial(&self, route: &str, generation: u64) {
        if let Some(mut circuit) = self.circuits.get_mut(route) {
            if circuit.generation == generation && circuit.state == CircuitState::HalfOpen {
                debug!(route = route, "Half-open trial abandoned, slot released");
                circuit.trial_in_flight = false;
            }
        }
    }

    /// Current state of a route's circuit (no cooldown transition is applied)
    pub fn get_state(&self, route: &str) -> CircuitState {
        self.circuits
            .get(route)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failures counted in the current closed period
    pub fn consecutive_failures(&self, route: &str) -> u32 {
        self.circuits
            .get(route)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }

    /// Get statistics for all circuits, sorted by route
    pub fn get_stats(&self) -> Vec<CircuitStats> {
        let now = self.clock.now();
        let mut stats: Vec<CircuitStats> = self
            .circuits
            .iter()
            .map(|entry| {
                let circuit = entry.value();
                CircuitStats {
                    route: entry.key().clone(),
                    state: circuit.state,
                    consecutive_failures: circuit.consecutive_failures,
                    failure_threshold: circuit.config.failure_threshold,
                    total_requests: circuit.total_requests,
                    total_failures: circuit.total_failures,
                    total_rejected: circuit.total_rejected,
                    time_in_state_ms: now.saturating_duration_since(circuit.last_transition).as_millis()
                        as u64,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.route.cmp(&b.route));
        stats
    }

    /// Reset a specific circuit (for admin purposes). Returns false for unknown routes.
    pub fn reset(&self, route: &str) -> bool {
        match self.circuits.get_mut(route) {
            Some(mut circuit) => {
                info!(route = route, "Circuit breaker manually reset");
                circuit.transition(CircuitState::Closed, self.clock.now());
                true
            }
            None => false,
        }
    }

    /// Reset all circuits
    pub fn reset_all(&self) {
        let now = self.clock.now();
        for mut entry in self.circuits.iter_mut() {
            info!(route = %entry.key(), "Circuit breaker manually reset");
            entry.value_mut().transition(CircuitState::Closed, now);
        }
    }
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub route: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
    pub time_in_state_ms: u64,
}
