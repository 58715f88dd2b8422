//! Core value types shared by the pipeline stages.

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::domain::error::GatewayError;

/// Rate-limit identity: an IP literal, a token subject, or the anonymous sentinel.
///
/// Equality is exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Sentinel shared by every caller whose identity cannot be determined
    pub const ANONYMOUS: &'static str = "anonymous-user";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == Self::ANONYMOUS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RateLimitKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Buffered HTTP response produced by the pipeline.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Plain-text response
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status, body.into());
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// JSON response
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        let mut response = Self::new(status, serde_json::to_vec(body).unwrap_or_default());
        response
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    /// Body as UTF-8 text (lossy)
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Terminal result of one pipeline run, reported to observers at exit.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Backend answered with a non-5xx status
    Dispatched { status: StatusCode, latency: Duration },
    /// Request refused or failed; `latency` is set when a dispatch was attempted
    Failed {
        error: GatewayError,
        latency: Option<Duration>,
    },
    /// No route owns the request path
    NoRoute,
    /// Caller went away before a response was produced
    Cancelled,
}

impl Outcome {
    /// Stable label: `dispatched`, `no_route`, or the error kind
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Dispatched { .. } => "dispatched",
            Outcome::Failed { error, .. } => error.kind(),
            Outcome::NoRoute => "no_route",
            Outcome::Cancelled => "cancelled",
        }
    }

    /// Backend latency, when a dispatch was attempted
    pub fn latency(&self) -> Option<Duration> {
        match self {
            Outcome::Dispatched { latency, .. } => Some(*latency),
            Outcome::Failed { latency, .. } => *latency,
            Outcome::NoRoute | Outcome::Cancelled => None,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, Outcome::Dispatched { .. })
    }
}
