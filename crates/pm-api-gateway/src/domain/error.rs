//! Gateway error kinds.
//!
//! [`GatewayError`] enumerates every way a request can fail to reach a
//! healthy backend. None of them is fatal: each maps to a well-formed
//! response (or, for the verification kinds, is absorbed by the key
//! resolver before it reaches the pipeline).

use std::time::Duration;

use crate::domain::config::ConfigError;

/// Per-request failure kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Bearer token could not be parsed or failed validation
    #[error("malformed bearer token: {0}")]
    MalformedToken(String),

    /// Identity verification collaborator failed or timed out
    #[error("identity verification unavailable: {0}")]
    VerificationUnavailable(String),

    /// Key exhausted its token bucket
    #[error("rate limit exceeded for {key} on {route}")]
    RateLimitExceeded {
        route: String,
        key: String,
        retry_after: Duration,
    },

    /// Route circuit is open (or a half-open trial is already in flight)
    #[error("circuit open for {route}")]
    CircuitOpen { route: String },

    /// Connection to the backend could not be established or was reset
    #[error("backend for {route} unreachable: {reason}")]
    BackendUnreachable { route: String, reason: String },

    /// Backend did not answer within the route timeout
    #[error("backend for {route} timed out after {}ms", timeout.as_millis())]
    BackendTimeout { route: String, timeout: Duration },

    /// Backend answered with a 5xx status
    #[error("backend for {route} returned server error {status}")]
    BackendServerError { route: String, status: u16 },
}

impl GatewayError {
    /// Stable snake_case label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::MalformedToken(_) => "malformed_token",
            GatewayError::VerificationUnavailable(_) => "verification_unavailable",
            GatewayError::RateLimitExceeded { .. } => "rate_limited",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::BackendUnreachable { .. } => "backend_unreachable",
            GatewayError::BackendTimeout { .. } => "backend_timeout",
            GatewayError::BackendServerError { .. } => "backend_server_error",
        }
    }

    /// Whether this error came from a dispatch attempt and therefore counts
    /// against the route's circuit.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::BackendUnreachable { .. }
                | GatewayError::BackendTimeout { .. }
                | GatewayError::BackendServerError { .. }
        )
    }
}

/// Process-level errors (startup, binding, serving).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration rejected by validation
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server socket bind error
    #[error("server bind error on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Server terminated with an error
    #[error("server error: {0}")]
    Serve(String),

    /// Upstream HTTP client could not be constructed
    #[error("backend client error: {0}")]
    Client(String),
}
