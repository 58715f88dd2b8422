//! HS256 bearer token verification.

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::ports::{IdentityVerifier, VerificationError};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Verifies HS256 JWTs signed with a shared secret and returns `sub`.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<String, VerificationError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => VerificationError::Malformed(e.to_string()),
                _ => VerificationError::Rejected(e.to_string()),
            }
        })?;
        Ok(data.claims.sub)
    }
}

/// Verifier used when no JWT secret is configured: every token is rejected.
#[derive(Debug, Default)]
pub struct RejectAllVerifier;

#[async_trait]
impl IdentityVerifier for RejectAllVerifier {
    async fn verify(&self, _token: &str) -> Result<String, VerificationError> {
        Err(VerificationError::Unavailable("no JWT secret configured".into()))
    }
}
