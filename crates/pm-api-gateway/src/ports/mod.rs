//! Ports (hexagonal architecture) for the API Gateway.

pub mod outbound;

pub use outbound::{
    Backend, BackendError, Clock, IdentityVerifier, ManualClock, SystemClock, VerificationError,
};
