//! Request pipeline.
//!
//! Fixed stage order:
//!
//! ```text
//! observers.on_request
//!   → route match        (404 when no route owns the path)
//!   → key resolve        (never fails)
//!   → rate limit         (429 on rejection)
//!   → circuit check      (503 fallback when open)
//!   → dispatch           (503 fallback on unreachable / timeout / 5xx)
//! observers.on_response
//! ```
//!
//! Any stage may short-circuit with a terminal response. The exit observers
//! run exactly once per request, with [`Outcome::Cancelled`] when the caller
//! drops the request before it completes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use futures::FutureExt;
use tracing::debug;

use crate::domain::{GatewayConfig, GatewayError, GatewayResponse, Outcome, RequestContext};
use crate::middleware::circuit_breaker::{CallPermit, CircuitBreakerManager};
use crate::middleware::fallback::FallbackResponder;
use crate::middleware::logging::Observers;
use crate::ports::{Backend, BackendError, Clock, IdentityVerifier};
use crate::resolver::KeyResolver;
use crate::router::{Route, RouteTable};

/// Terminal result of a pipeline run
struct Exit {
    outcome: Outcome,
    response: GatewayResponse,
}

/// Owns the request context and reports its exit to the observers exactly
/// once, including when the pipeline future is dropped mid-flight.
struct ExitReport<'a> {
    observers: &'a Observers,
    ctx: RequestContext,
    reported: bool,
}

impl<'a> ExitReport<'a> {
    fn new(observers: &'a Observers, ctx: RequestContext) -> Self {
        observers.request(&ctx);
        Self {
            observers,
            ctx,
            reported: false,
        }
    }

    fn report(mut self, outcome: &Outcome, status: StatusCode) {
        self.reported = true;
        self.observers.response(&self.ctx, outcome, status);
    }
}

impl Drop for ExitReport<'_> {
    fn drop(&mut self) {
        if !self.reported {
            // 499: client closed request
            let status = StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT);
            self.observers.response(&self.ctx, &Outcome::Cancelled, status);
        }
    }
}

/// The gateway request pipeline.
///
/// Holds all process-wide gateway state: route table (with per-route
/// rate limiters), circuit breakers, fallbacks and observers.
pub struct Pipeline {
    routes: RouteTable,
    resolver: KeyResolver,
    circuits: Arc<CircuitBreakerManager>,
    fallbacks: FallbackResponder,
    backend: Arc<dyn Backend>,
    observers: Observers,
}

impl Pipeline {
    /// Build the pipeline from validated configuration.
    pub fn new(
        config: &GatewayConfig,
        verifier: Arc<dyn IdentityVerifier>,
        backend: Arc<dyn Backend>,
        clock: Arc<dyn Clock>,
        observers: Observers,
    ) -> Self {
        let circuits = Arc::new(CircuitBreakerManager::new(
            config.circuit_breaker.clone(),
            clock.clone(),
        ));
        for route in &config.routes {
            circuits.register(&route.id, config.circuit_breaker_for(route));
        }

        Self {
            routes: RouteTable::from_config(config, clock),
            resolver: KeyResolver::new(verifier, config.timeouts.verification),
            circuits,
            fallbacks: FallbackResponder::from_config(config),
            backend,
            observers,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn circuits(&self) -> &Arc<CircuitBreakerManager> {
        &self.circuits
    }

    /// Run one request through every stage. Always produces a response.
    pub async fn handle(&self, ctx: RequestContext) -> GatewayResponse {
        let mut report = ExitReport::new(&self.observers, ctx);

        let exit = match self.run(&mut report.ctx).await {
            Ok(exit) | Err(exit) => exit,
        };

        report.report(&exit.outcome, exit.response.status);
        exit.response
    }

    /// `Err` is a short-circuit.
    async fn run(&self, ctx: &mut RequestContext) -> Result<Exit, Exit> {
        let route = self.match_route(ctx)?;

        let key = self.resolver.resolve(route.resolver, ctx).await;
        ctx.annotations_mut().rate_limit_key = Some(key.clone());

        let decision = route.limiter.check(&key);
        if !decision.allowed {
            debug!(
                route = %route.id,
                key = %key,
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return Err(Exit {
                outcome: Outcome::Failed {
                    error: GatewayError::RateLimitExceeded {
                        route: route.id.to_string(),
                        key: key.to_string(),
                        retry_after: decision.retry_after,
                    },
                    latency: None,
                },
                response: self.fallbacks.rate_limited(&route.id, decision.retry_after),
            });
        }

        let permit = match self.circuits.try_acquire(&route.id) {
            Ok(permit) => permit,
            Err(error) => {
                return Err(Exit {
                    outcome: Outcome::Failed {
                        error,
                        latency: None,
                    },
                    response: self.fallbacks.fallback(&route.id),
                })
            }
        };
        ctx.annotations_mut().trial_dispatch = permit.is_trial();

        Ok(self.dispatch(&route, ctx, permit).await)
    }

    fn match_route(&self, ctx: &mut RequestContext) -> Result<Arc<Route>, Exit> {
        match self.routes.match_path(ctx.path()) {
            Some(route) => {
                ctx.annotations_mut().route_id = Some(route.id.to_string());
                Ok(route.clone())
            }
            None => Err(Exit {
                outcome: Outcome::NoRoute,
                response: self.fallbacks.not_found(ctx.path()),
            }),
        }
    }

    /// Forward to the backend and feed the outcome to the circuit.
    ///
    /// If this future is dropped mid-flight the permit is dropped unsettled
    /// and nothing is recorded.
    async fn dispatch(&self, route: &Route, ctx: &RequestContext, permit: CallPermit<'_>) -> Exit {
        let url = route.upstream_url(ctx.path(), ctx.query());
        let started = Instant::now();

        let call = AssertUnwindSafe(self.backend.dispatch(&route.id, &url, ctx)).catch_unwind();
        let result = tokio::time::timeout(route.timeout, call).await;
        let latency = started.elapsed();

        let error = match result {
            Ok(Ok(Ok(response))) if !response.status.is_server_error() => {
                permit.record_success();
                return Exit {
                    outcome: Outcome::Dispatched {
                        status: response.status,
                        latency,
                    },
                    response,
                };
            }
            Ok(Ok(Ok(response))) => GatewayError::BackendServerError {
                route: route.id.to_string(),
                status: response.status.as_u16(),
            },
            Ok(Ok(Err(BackendError::Unreachable(reason)))) => GatewayError::BackendUnreachable {
                route: route.id.to_string(),
                reason,
            },
            Ok(Ok(Err(BackendError::Timeout))) | Err(_) => GatewayError::BackendTimeout {
                route: route.id.to_string(),
                timeout: route.timeout,
            },
            Ok(Err(_panic)) => GatewayError::BackendUnreachable {
                route: route.id.to_string(),
                reason: "backend adapter panicked".into(),
            },
        };

        permit.record_failure();
        Exit {
            outcome: Outcome::Failed {
                error,
                latency: Some(latency),
            },
            response: self.fallbacks.fallback(&route.id),
        }
    }
}
