// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Patient-management API Gateway - the entry point in front of the backend services.
//!
//! Every inbound request passes a fixed pipeline that resolves a
//! rate-limiting identity, enforces per-key token buckets, checks the
//! route's circuit breaker, and either dispatches to the backend or serves
//! a canned fallback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        API GATEWAY (pm-api-gateway)                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐                             ┌─────────────┐         │
//! │  │    Proxy    │                             │    Admin    │         │
//! │  │  Port 4004  │                             │  Port 9004  │         │
//! │  └──────┬──────┘                             └─────────────┘         │
//! │         │                                                            │
//! │  ┌──────┴──────────────────────────────────────────────────┐         │
//! │  │                       Pipeline                          │         │
//! │  │  Log → Route → Key → Limit → Circuit → Dispatch → Log   │         │
//! │  └──────┬───────────────────────────────────┬──────────────┘         │
//! │         │ on refusal / failure              │ admitted               │
//! │  ┌──────┴──────────┐                 ┌──────┴──────────┐             │
//! │  │    Fallback     │                 │   HttpBackend   │             │
//! │  │ 429 / 503 / 404 │                 │    (reqwest)    │             │
//! │  └─────────────────┘                 └──────┬──────────┘             │
//! └─────────────────────────────────────────────┼────────────────────────┘
//!                                               │
//!                      ┌────────────────────────┼───────────────┐
//!                      ▼                                        ▼
//!              patient-service                            auth-service
//! ```
//!
//! # Key Resolution
//!
//! - **ip** (default): the caller's remote address
//! - **identity**: the `sub` of a verified bearer token; any verification
//!   failure degrades to the shared `anonymous-user` key
//!
//! # Usage
//!
//! ```ignore
//! use pm_api_gateway::{ApiGatewayService, GatewayConfig, HttpBackend, JwtVerifier};
//!
//! let config = GatewayConfig::from_env()?;
//! let verifier = Arc::new(JwtVerifier::new("secret", 30));
//! let backend = Arc::new(HttpBackend::new(config.timeouts.connect)?);
//! let service = ApiGatewayService::new(config, verifier, backend)?;
//! service.start().await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod middleware;
pub mod pipeline;
pub mod ports;
pub mod resolver;
pub mod router;
pub mod service;

// Re-exports for public API
pub use adapters::{HttpBackend, JwtVerifier, RejectAllVerifier};
pub use domain::config::GatewayConfig;
pub use domain::error::{GatewayError, ServiceError};
pub use domain::types::*;
pub use domain::RequestContext;
pub use middleware::{CircuitBreakerManager, CircuitState, FallbackResponder, GatewayMetrics, RateLimiter};
pub use pipeline::Pipeline;
pub use resolver::{KeyResolver, ResolverPolicy};
pub use router::{Route, RouteTable};
pub use service::{ApiGatewayService, ShutdownHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
