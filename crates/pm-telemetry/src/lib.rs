//! # PM Telemetry
//!
//! Structured logging for the patient-management gateway.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pm_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//!     // Logs emitted via `tracing` macros are now formatted and filtered.
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PM_SERVICE_NAME` | `pm-api-gateway` | Service name on the startup and shutdown events |
//! | `PM_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `PM_JSON_LOGS` | `false` (`true` in containers) | JSON log output |
//! | `PM_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Install the global tracing subscriber.
///
/// Returns a guard that should be held for the lifetime of the application.
/// Calling this twice in one process fails with [`TelemetryError::SubscriberInit`].
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    tracing_setup::init_tracing(&config)?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        level = %config.log_level,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active for the process lifetime.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry...");
    }
}
