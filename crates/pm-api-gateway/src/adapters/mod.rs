//! Adapters implementing the outbound ports.

pub mod http_backend;
pub mod jwt;

pub use http_backend::HttpBackend;
pub use jwt::{JwtVerifier, RejectAllVerifier};
