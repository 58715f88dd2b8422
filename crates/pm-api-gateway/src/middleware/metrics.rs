//! Request metrics, collected as a [`RequestObserver`].
//!
//! Exposed by the admin server as JSON and Prometheus text.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::StatusCode;

use crate::domain::{GatewayError, Outcome, RequestContext};
use crate::middleware::logging::RequestObserver;

/// API Gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub requests_total: AtomicU64,
    pub in_flight: AtomicU64,
    pub dispatched_total: AtomicU64,
    pub backend_failures_total: AtomicU64,
    pub backend_timeouts_total: AtomicU64,
    pub rate_limited_total: AtomicU64,
    pub circuit_open_total: AtomicU64,
    pub no_route_total: AtomicU64,
    pub cancelled_total: AtomicU64,

    // Latency of dispatch attempts only
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get average dispatch latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let counters = [
            ("requests_total", "Total number of gateway requests", &self.requests_total),
            ("dispatched_total", "Requests answered by a backend", &self.dispatched_total),
            (
                "backend_failures_total",
                "Dispatches that failed (unreachable, timeout, 5xx)",
                &self.backend_failures_total,
            ),
            ("backend_timeouts_total", "Dispatches that timed out", &self.backend_timeouts_total),
            ("rate_limited_total", "Requests rejected by the rate limiter", &self.rate_limited_total),
            (
                "circuit_open_total",
                "Requests refused by an open circuit",
                &self.circuit_open_total,
            ),
            ("no_route_total", "Requests matching no route", &self.no_route_total),
            ("cancelled_total", "Requests abandoned by the caller", &self.cancelled_total),
        ];

        for (name, help, value) in counters {
            let _ = write!(
                output,
                "# HELP pm_gateway_{name} {help}\n\
                 # TYPE pm_gateway_{name} counter\n\
                 pm_gateway_{name} {}\n",
                value.load(Ordering::Relaxed)
            );
        }

        let _ = write!(
            output,
            "# HELP pm_gateway_in_flight Requests currently in the pipeline\n\
             # TYPE pm_gateway_in_flight gauge\n\
             pm_gateway_in_flight {}\n",
            self.in_flight.load(Ordering::Relaxed)
        );
        let _ = write!(
            output,
            "# HELP pm_gateway_average_latency_ms Average dispatch latency\n\
             # TYPE pm_gateway_average_latency_ms gauge\n\
             pm_gateway_average_latency_ms {:.2}\n",
            self.average_latency_ms()
        );

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "in_flight": self.in_flight.load(Ordering::Relaxed),
                "dispatched": self.dispatched_total.load(Ordering::Relaxed),
                "no_route": self.no_route_total.load(Ordering::Relaxed),
                "cancelled": self.cancelled_total.load(Ordering::Relaxed),
            },
            "backend": {
                "failures": self.backend_failures_total.load(Ordering::Relaxed),
                "timeouts": self.backend_timeouts_total.load(Ordering::Relaxed),
            },
            "rate_limiting": {
                "rejected": self.rate_limited_total.load(Ordering::Relaxed),
            },
            "circuit_breaker": {
                "refused": self.circuit_open_total.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            },
        })
    }
}

impl RequestObserver for GatewayMetrics {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_request(&self, _ctx: &RequestContext) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn on_response(&self, _ctx: &RequestContext, outcome: &Outcome, _status: StatusCode) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));

        let counter = match outcome {
            Outcome::Dispatched { .. } => &self.dispatched_total,
            Outcome::NoRoute => &self.no_route_total,
            Outcome::Cancelled => &self.cancelled_total,
            Outcome::Failed { error, .. } => match error {
                GatewayError::RateLimitExceeded { .. } => &self.rate_limited_total,
                GatewayError::CircuitOpen { .. } => &self.circuit_open_total,
                GatewayError::BackendTimeout { .. } => {
                    self.backend_timeouts_total.fetch_add(1, Ordering::Relaxed);
                    &self.backend_failures_total
                }
                _ => &self.backend_failures_total,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = outcome.latency() {
            self.total_latency_ms
                .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
            self.request_count_for_latency.fetch_add(1, Ordering::Relaxed);
        }
    }
}
