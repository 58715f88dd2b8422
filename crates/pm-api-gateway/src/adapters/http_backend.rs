//! Forwarding backend over HTTP (reqwest).

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::domain::{GatewayResponse, RequestContext, ServiceError};
use crate::ports::{Backend, BackendError};

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
    header::CONTENT_LENGTH,
];

/// Proxies requests to upstream services with a pooled HTTP client.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// `connect_timeout` bounds connection setup only. The exchange itself
    /// is bounded by the pipeline with the route's dispatch timeout.
    pub fn new(connect_timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ServiceError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded.remove("keep-alive");
    forwarded
}

#[async_trait]
impl Backend for HttpBackend {
    async fn dispatch(
        &self,
        route_id: &str,
        url: &str,
        ctx: &RequestContext,
    ) -> Result<GatewayResponse, BackendError> {
        let mut headers = forwardable(ctx.headers());
        if let Some(addr) = ctx.remote_addr() {
            if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
                headers.append("x-forwarded-for", value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&ctx.id().to_string()) {
            headers.insert("x-request-id", value);
        }

        debug!(route = route_id, method = %ctx.method(), url, "Forwarding request");

        let response = self
            .client
            .request(ctx.method().clone(), url)
            .headers(headers)
            .body(ctx.body().clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let headers = forwardable(response.headers());
        let body = response.bytes().await.map_err(classify)?;

        Ok(GatewayResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Unreachable(err.to_string())
    }
}
