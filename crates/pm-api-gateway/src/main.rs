//! # PM API Gateway
//!
//! Binary entry point: loads configuration from the environment, wires the
//! JWT verifier and HTTP backend, and serves until Ctrl+C.
//!
//! ## Environment
//!
//! - `PM_GATEWAY_CONFIG`: path to a JSON config file (built-in routes otherwise)
//! - `PM_HTTP_PORT` / `PM_ADMIN_PORT`: listener port overrides
//! - `PM_JWT_SECRET`: HS256 secret; without it every bearer token resolves
//!   to the anonymous key

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pm_api_gateway::ports::IdentityVerifier;
use pm_api_gateway::{
    ApiGatewayService, GatewayConfig, HttpBackend, JwtVerifier, RejectAllVerifier, VERSION,
};
use pm_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig::for_service("pm-api-gateway"))
        .context("Failed to initialize telemetry")?;

    let config = GatewayConfig::from_env().context("Failed to load gateway configuration")?;

    let verifier: Arc<dyn IdentityVerifier> = match &config.identity.jwt_secret {
        Some(secret) => Arc::new(JwtVerifier::new(secret, config.identity.leeway_secs)),
        None => {
            warn!("PM_JWT_SECRET not set, identity-keyed routes will share the anonymous bucket");
            Arc::new(RejectAllVerifier)
        }
    };
    let backend = Arc::new(
        HttpBackend::new(config.timeouts.connect).context("Failed to build upstream client")?,
    );

    let service = ApiGatewayService::new(config, verifier, backend)
        .context("Invalid gateway configuration")?;

    let shutdown = service.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.shutdown();
        }
    });

    info!(version = VERSION, "Starting API gateway");
    service.start().await.context("Gateway terminated with an error")?;

    info!("Shutdown complete");
    Ok(())
}
