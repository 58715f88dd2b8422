//! API Gateway service - proxy and admin servers.
//!
//! Owns the process-wide gateway state for its lifetime: it is built once
//! in [`ApiGatewayService::new`], shared by every request, and dropped on
//! shutdown.

use std::error::Error as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http_body_util::LengthLimitError;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::{GatewayConfig, RequestContext, ServiceError};
use crate::middleware::logging::{Observers, TracingObserver};
use crate::middleware::metrics::GatewayMetrics;
use crate::middleware::rate_limit::cleanup_task;
use crate::pipeline::Pipeline;
use crate::ports::{Backend, Clock, IdentityVerifier, SystemClock};
use crate::VERSION;

/// Cloneable trigger for graceful shutdown
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    /// Ask the servers to stop. Idempotent.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    async fn wait(self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// API Gateway service state
pub struct ApiGatewayService {
    config: GatewayConfig,
    pipeline: Arc<Pipeline>,
    metrics: Arc<GatewayMetrics>,
    shutdown: ShutdownHandle,
}

impl ApiGatewayService {
    /// Create a new API Gateway service
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<dyn IdentityVerifier>,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, ServiceError> {
        Self::with_clock(config, verifier, backend, Arc::new(SystemClock))
    }

    /// Same as [`new`](Self::new) with an explicit time source.
    pub fn with_clock(
        config: GatewayConfig,
        verifier: Arc<dyn IdentityVerifier>,
        backend: Arc<dyn Backend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let metrics = Arc::new(GatewayMetrics::new());
        let observers = Observers::new()
            .with(Arc::new(TracingObserver::new()))
            .with(metrics.clone());
        let pipeline = Arc::new(Pipeline::new(&config, verifier, backend, clock, observers));

        Ok(Self {
            config,
            pipeline,
            metrics,
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Get metrics
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Proxy router: every path goes through the pipeline.
    ///
    /// Remote addresses come from `ConnectInfo<SocketAddr>`; serve it with
    /// `into_make_service_with_connect_info`.
    pub fn router(&self) -> Router {
        let state = ProxyState {
            pipeline: Arc::clone(&self.pipeline),
            max_body_bytes: self.config.http.max_body_bytes,
        };
        Router::new().fallback(proxy).with_state(state)
    }

    /// Admin router: health, metrics and circuit state
    pub fn admin_router(&self) -> Router {
        let metrics = Arc::clone(&self.metrics);
        let prometheus = Arc::clone(&self.metrics);

        Router::new()
            .route("/health", get(health_check))
            .route(
                "/metrics",
                get(move || {
                    let metrics = Arc::clone(&metrics);
                    async move { Json(metrics.to_json()) }
                }),
            )
            .route(
                "/metrics/prometheus",
                get(move || {
                    let metrics = Arc::clone(&prometheus);
                    async move { metrics.to_prometheus() }
                }),
            )
            .route("/circuits", get(circuit_stats))
            .route("/circuits/:route/reset", post(reset_circuit))
            .with_state(Arc::clone(&self.pipeline))
    }

    /// Bind the servers and serve until [`shutdown`](Self::shutdown) or a server error.
    pub async fn start(&self) -> Result<(), ServiceError> {
        info!(version = VERSION, "Starting API Gateway...");

        let http_addr = self.config.http_addr();
        let http_listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|source| ServiceError::Bind {
                addr: http_addr,
                source,
            })?;

        let admin_handle = if self.config.admin.enabled {
            let admin_addr = self.config.admin_addr();
            let listener = tokio::net::TcpListener::bind(admin_addr)
                .await
                .map_err(|source| ServiceError::Bind {
                    addr: admin_addr,
                    source,
                })?;
            info!(addr = %admin_addr, "Starting Admin server");
            let server = axum::serve(listener, self.admin_router())
                .with_graceful_shutdown(self.shutdown.clone().wait());
            Some(tokio::spawn(async move {
                if let Err(e) = server.await {
                    error!(error = %e, "Admin server error");
                }
            }))
        } else {
            None
        };

        let store = &self.config.bucket_store;
        let cleanup_handle = tokio::spawn(cleanup_task(
            self.pipeline.routes().limiters(),
            store.cleanup_interval,
            store.idle_ttl,
        ));

        info!(
            addr = %http_addr,
            routes = self.pipeline.routes().routes().len(),
            "API Gateway started successfully"
        );

        let result = axum::serve(
            http_listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.shutdown.clone().wait())
        .await
        .map_err(|e| ServiceError::Serve(e.to_string()));

        // Stop companions whichever way the proxy server ended
        self.shutdown.shutdown();
        cleanup_handle.abort();
        if let Some(handle) = admin_handle {
            let _ = handle.await;
        }

        info!("API Gateway stopped");
        result
    }
}

#[derive(Clone)]
struct ProxyState {
    pipeline: Arc<Pipeline>,
    max_body_bytes: usize,
}

async fn proxy(
    State(state): State<ProxyState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) if exceeds_limit(&e) => {
            warn!(path = parts.uri.path(), error = %e, "Request body too large");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({ "error": "payload_too_large" })),
            )
                .into_response();
        }
        Err(e) => {
            warn!(path = parts.uri.path(), error = %e, "Request body unreadable");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "body_read_failed" })),
            )
                .into_response();
        }
    };

    let ctx = RequestContext::from_parts(&parts, connect_info.map(|ConnectInfo(addr)| addr), body);
    state.pipeline.handle(ctx).await.into_response()
}

fn exceeds_limit(err: &axum::Error) -> bool {
    let mut cause = err.source();
    while let Some(e) = cause {
        if e.is::<LengthLimitError>() {
            return true;
        }
        cause = e.source();
    }
    false
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": VERSION,
    }))
}

async fn circuit_stats(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    Json(pipeline.circuits().get_stats())
}

async fn reset_circuit(
    State(pipeline): State<Arc<Pipeline>>,
    Path(route): Path<String>,
) -> Response {
    if pipeline.circuits().reset(&route) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "route_not_found", "route": route })),
        )
            .into_response()
    }
}
