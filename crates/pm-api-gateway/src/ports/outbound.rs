//! Outbound ports for the API Gateway.
//!
//! The gateway depends on three collaborators it does not implement: a time
//! source, the identity-verification service, and the backends it fronts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{GatewayResponse, RequestContext};

/// Monotonic time source for testability
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// System time implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Shared handle, convenient for wiring into several components
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Verification failures. The gateway treats all of them alike.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// Token is not structurally a token
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Token parsed but is expired, badly signed, or otherwise invalid
    #[error("token rejected: {0}")]
    Rejected(String),
    /// Verifier could not be reached
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// Identity verification collaborator: opaque bearer token in, subject out.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, VerificationError>;
}

/// Transport-level dispatch failures. 5xx answers are responses, not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, reset, DNS failure, body read failure
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    /// Client-side timeout fired inside the backend adapter
    #[error("backend timed out")]
    Timeout,
}

/// A backend the gateway forwards to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Forward `ctx` to `url` on behalf of `route_id`.
    async fn dispatch(
        &self,
        route_id: &str,
        url: &str,
        ctx: &RequestContext,
    ) -> Result<GatewayResponse, BackendError>;
}
