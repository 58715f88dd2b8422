//! Pipeline stages for the API Gateway.
//!
//! Stage order: Observers(enter) → KeyResolve → RateLimit → CircuitCheck → Dispatch-or-Fallback → Observers(exit)
//!
//! ## Circuit Breaker
//!
//! The circuit breaker prevents cascading failures when a backend becomes
//! unhealthy. It tracks consecutive failures per route and opens the
//! circuit when the threshold is reached, serving the route's fallback
//! until a trial request succeeds.

pub mod circuit_breaker;
pub mod fallback;
pub mod logging;
pub mod metrics;
pub mod rate_limit;

pub use circuit_breaker::{CallPermit, CircuitBreakerManager, CircuitState, CircuitStats};
pub use fallback::FallbackResponder;
pub use logging::{Observers, RequestObserver, TracingObserver};
pub use metrics::GatewayMetrics;
pub use rate_limit::{RateLimitDecision, RateLimiter};
