//! Request observers.
//!
//! Observers see every request twice: once on entry and once on exit with
//! the terminal [`Outcome`]. They sit beside the decision path, not on it:
//! a panicking observer is contained and the response is unchanged.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{error, info, warn};

use crate::domain::{Outcome, RequestContext};

/// Entry/exit hook invoked by the pipeline.
pub trait RequestObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_request(&self, ctx: &RequestContext);

    /// `status` is the status code returned to the caller.
    fn on_response(&self, ctx: &RequestContext, outcome: &Outcome, status: StatusCode);
}

/// Structured access log through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl TracingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl RequestObserver for TracingObserver {
    fn name(&self) -> &str {
        "access-log"
    }

    fn on_request(&self, ctx: &RequestContext) {
        info!(
            request_id = %ctx.id(),
            method = %ctx.method(),
            path = ctx.path(),
            timestamp = %ctx.received_at_utc().to_rfc3339(),
            remote = ?ctx.remote_addr(),
            "→ inbound request"
        );
    }

    fn on_response(&self, ctx: &RequestContext, outcome: &Outcome, status: StatusCode) {
        let annotations = ctx.annotations();
        let route = annotations.route_id.as_deref().unwrap_or("-");
        let key = annotations
            .rate_limit_key
            .as_ref()
            .map(|k| k.as_str())
            .unwrap_or("-");
        let latency_ms = outcome.latency().map(|l| l.as_millis() as u64);

        match outcome {
            Outcome::Failed { error, .. } if error.is_backend_failure() => error!(
                request_id = %ctx.id(),
                method = %ctx.method(),
                path = ctx.path(),
                route,
                key,
                outcome = outcome.label(),
                status = status.as_u16(),
                latency_ms = ?latency_ms,
                trial = annotations.trial_dispatch,
                error = %error,
                "← backend failure, fallback served"
            ),
            Outcome::Failed { .. } => warn!(
                request_id = %ctx.id(),
                method = %ctx.method(),
                path = ctx.path(),
                route,
                key,
                outcome = outcome.label(),
                status = status.as_u16(),
                "← request refused"
            ),
            Outcome::Cancelled => warn!(
                request_id = %ctx.id(),
                method = %ctx.method(),
                path = ctx.path(),
                route,
                key,
                outcome = outcome.label(),
                "← caller disconnected"
            ),
            Outcome::Dispatched { .. } | Outcome::NoRoute => info!(
                request_id = %ctx.id(),
                method = %ctx.method(),
                path = ctx.path(),
                route,
                key,
                outcome = outcome.label(),
                status = status.as_u16(),
                latency_ms = ?latency_ms,
                trial = annotations.trial_dispatch,
                "← outbound response"
            ),
        }
    }
}

/// Ordered set of observers with panic containment.
#[derive(Clone, Default)]
pub struct Observers {
    observers: Vec<Arc<dyn RequestObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn request(&self, ctx: &RequestContext) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_request(ctx))).is_err() {
                warn!(observer = observer.name(), "Observer panicked on request");
            }
        }
    }

    pub fn response(&self, ctx: &RequestContext, outcome: &Outcome, status: StatusCode) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_response(ctx, outcome, status)))
                .is_err()
            {
                warn!(observer = observer.name(), "Observer panicked on response");
            }
        }
    }
}
