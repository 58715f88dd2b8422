//! Rate-limit key resolution.
//!
//! Two interchangeable strategies selected per route:
//!
//! - [`ResolverPolicy::Ip`]: the caller's remote IP address.
//! - [`ResolverPolicy::Identity`]: the subject of a verified bearer token,
//!   falling back to the remote IP when no bearer token is sent.
//!
//! Resolution never fails. Every verification problem (garbage token,
//! rejected token, verifier down, slow, or panicking) degrades to the
//! shared `anonymous-user` key.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{GatewayError, RateLimitKey, RequestContext};
use crate::ports::{IdentityVerifier, VerificationError};

/// Key resolution strategy for a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverPolicy {
    /// Remote IP address
    #[default]
    Ip,
    /// Bearer token subject
    Identity,
}

impl From<VerificationError> for GatewayError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::Malformed(reason) | VerificationError::Rejected(reason) => {
                GatewayError::MalformedToken(reason)
            }
            VerificationError::Unavailable(reason) => GatewayError::VerificationUnavailable(reason),
        }
    }
}

/// Resolves the rate-limit identity of a request.
#[derive(Clone)]
pub struct KeyResolver {
    verifier: Arc<dyn IdentityVerifier>,
    verify_timeout: Duration,
}

impl KeyResolver {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, verify_timeout: Duration) -> Self {
        Self {
            verifier,
            verify_timeout,
        }
    }

    /// Resolve the key for `ctx` under `policy`.
    pub async fn resolve(&self, policy: ResolverPolicy, ctx: &RequestContext) -> RateLimitKey {
        match policy {
            ResolverPolicy::Ip => ip_key(ctx),
            ResolverPolicy::Identity => self.identity_key(ctx).await,
        }
    }

    async fn identity_key(&self, ctx: &RequestContext) -> RateLimitKey {
        let Some(token) = ctx.bearer_token() else {
            return ip_key(ctx);
        };

        match self.subject(token).await {
            Ok(subject) => RateLimitKey::new(subject),
            Err(err) => {
                debug!(
                    request_id = %ctx.id(),
                    kind = err.kind(),
                    error = %err,
                    "Bearer token not verified, using anonymous key"
                );
                RateLimitKey::anonymous()
            }
        }
    }

    async fn subject(&self, token: &str) -> Result<String, GatewayError> {
        if token.is_empty() {
            return Err(GatewayError::MalformedToken("empty bearer token".into()));
        }

        let verification = AssertUnwindSafe(self.verifier.verify(token)).catch_unwind();
        match tokio::time::timeout(self.verify_timeout, verification).await {
            Err(_) => Err(GatewayError::VerificationUnavailable(format!(
                "no answer within {}ms",
                self.verify_timeout.as_millis()
            ))),
            Ok(Err(_panic)) => Err(GatewayError::VerificationUnavailable(
                "verifier panicked".into(),
            )),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Ok(Ok(subject))) if subject.trim().is_empty() => {
                Err(GatewayError::MalformedToken("token has an empty subject".into()))
            }
            Ok(Ok(Ok(subject))) => Ok(subject),
        }
    }
}

/// Remote IP in textual form, IPv4-mapped IPv6 normalised to IPv4.
fn ip_key(ctx: &RequestContext) -> RateLimitKey {
    match ctx.remote_addr() {
        Some(addr) => RateLimitKey::new(addr.ip().to_canonical().to_string()),
        None => RateLimitKey::anonymous(),
    }
}
