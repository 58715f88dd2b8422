//! Canned degraded responses.
//!
//! Every response here is computed from configuration alone, so it is
//! available no matter what state the backends are in.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use serde_json::json;

use crate::domain::{GatewayConfig, GatewayResponse, RouteConfig};

/// Static fallback for one route
#[derive(Debug, Clone, PartialEq, Eq)]
struct FallbackRoute {
    status: StatusCode,
    body: String,
}

/// Builds fallback responses for circuit-open routes, failed dispatches,
/// rate-limit rejections and unknown paths.
#[derive(Debug, Clone, Default)]
pub struct FallbackResponder {
    routes: HashMap<String, FallbackRoute>,
}

impl FallbackResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut responder = Self::new();
        for route in &config.routes {
            responder.register(route);
        }
        responder
    }

    pub fn register(&mut self, route: &RouteConfig) {
        let fallback = match &route.fallback {
            Some(configured) => FallbackRoute {
                status: StatusCode::from_u16(configured.status)
                    .unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
                body: configured.body.clone(),
            },
            None => {
                let name = route
                    .display_name
                    .clone()
                    .unwrap_or_else(|| display_name(&route.id));
                FallbackRoute {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: unavailable_message(&name),
                }
            }
        };
        self.routes.insert(route.id.clone(), fallback);
    }

    /// Service-unavailable response naming the route.
    pub fn fallback(&self, route_id: &str) -> GatewayResponse {
        match self.routes.get(route_id) {
            Some(route) => GatewayResponse::text(route.status, route.body.clone()),
            None => GatewayResponse::text(
                StatusCode::SERVICE_UNAVAILABLE,
                unavailable_message(&display_name(route_id)),
            ),
        }
    }

    /// Too-many-requests response with a `Retry-After` header.
    pub fn rate_limited(&self, route_id: &str, retry_after: Duration) -> GatewayResponse {
        let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
        let body = json!({
            "error": "too_many_requests",
            "message": "Too many requests",
            "route": route_id,
            "retry_after_ms": retry_after_ms,
        });

        let mut response = GatewayResponse::json(StatusCode::TOO_MANY_REQUESTS, &body);
        let retry_after_secs = (retry_after_ms.saturating_add(999) / 1000).max(1);
        response
            .headers
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        response
    }

    /// No route owns `path`.
    pub fn not_found(&self, path: &str) -> GatewayResponse {
        GatewayResponse::json(
            StatusCode::NOT_FOUND,
            &json!({ "error": "route_not_found", "path": path }),
        )
    }
}

/// Human-readable name from a route id: `auth-service` becomes `Auth service`.
pub fn display_name(route_id: &str) -> String {
    let spaced = route_id.replace(['-', '_'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn unavailable_message(name: &str) -> String {
    format!("{name} is temporarily unavailable. Please try again later.")
}
