//! Per-request context.
//!
//! The inbound facts (method, path, headers, remote address, body) are fixed
//! at construction. Pipeline stages only add [`Annotations`], and only
//! before dispatch begins.

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::{header, HeaderMap, Method};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::types::RateLimitKey;

/// Scheme prefix recognised in the `Authorization` header
pub const BEARER_PREFIX: &str = "Bearer ";

/// Facts recorded by pipeline stages as the request moves through them.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    /// Route that owns the request path
    pub route_id: Option<String>,
    /// Resolved rate-limit identity
    pub rate_limit_key: Option<RateLimitKey>,
    /// Whether the dispatch was a half-open trial
    pub trial_dispatch: bool,
}

/// One inbound request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: Uuid,
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    body: Bytes,
    received_at: Instant,
    received_at_utc: DateTime<Utc>,
    annotations: Annotations,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            id: Uuid::now_v7(),
            method,
            path: path.into(),
            query: None,
            headers,
            remote_addr: None,
            body: Bytes::new(),
            received_at: Instant::now(),
            received_at_utc: Utc::now(),
            annotations: Annotations::default(),
        }
    }

    /// Build a context from an axum request head.
    pub fn from_parts(
        parts: &axum::http::request::Parts,
        remote_addr: Option<SocketAddr>,
        body: Bytes,
    ) -> Self {
        Self::new(parts.method.clone(), parts.uri.path(), parts.headers.clone())
            .with_query(parts.uri.query().map(str::to_string))
            .with_remote_addr(remote_addr)
            .with_body(body)
    }

    #[must_use]
    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: Option<SocketAddr>) -> Self {
        self.remote_addr = remote_addr;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Header map; lookups are case-insensitive.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn received_at_utc(&self) -> DateTime<Utc> {
        self.received_at_utc
    }

    /// Token following the `Bearer ` scheme in `Authorization`, if any.
    ///
    /// An empty token after the prefix is still returned so the resolver
    /// treats it as a (malformed) token rather than as an absent header.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub(crate) fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }
}
