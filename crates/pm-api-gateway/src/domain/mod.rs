//! Domain types for the API Gateway.
//!
//! This module contains the request context, value types, configuration,
//! and error handling.

pub mod config;
pub mod context;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::{
    CircuitBreakerConfig, ConfigError, FallbackConfig, GatewayConfig, RateLimitConfig, RouteConfig,
};
pub use context::{Annotations, RequestContext};
pub use error::{GatewayError, ServiceError};
pub use types::{GatewayResponse, Outcome, RateLimitKey};
