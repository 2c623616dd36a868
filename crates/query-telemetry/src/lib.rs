//! # Query Telemetry
//!
//! Structured logging for the query gateway, built on `tracing-subscriber`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use query_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config)?;
//!
//!     // Spans and events are now written to stdout
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QG_SERVICE_NAME` | `query-gateway` | Service name in the startup record |
//! | `QG_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `QG_JSON_LOGS` | `false` | JSON output (defaults on inside containers) |
//! | `QG_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingGuard};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Initialize logging for the process.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let logging = logging::init_logging(&config)?;
    Ok(TelemetryGuard {
        service_name: config.service_name,
        _logging: logging,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
    _logging: LoggingGuard,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
