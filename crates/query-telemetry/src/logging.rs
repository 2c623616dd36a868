//! Subscriber setup for structured logs.
//!
//! JSON output carries these fields for log shippers:
//! - `timestamp`: RFC 3339 timestamp
//! - `level`: Log level (trace, debug, info, warn, error)
//! - `target`: Module path, `query_gateway::audit` for policy rejections
//! - `fields`: Event message and structured context (`query_hash`, `user_id`, ...)
//! - `span`: Enclosing request span (`api_request` with method, path, request id)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Handle returned once the global subscriber is installed.
#[derive(Debug)]
pub struct LoggingGuard {
    json: bool,
}

impl LoggingGuard {
    /// Whether JSON formatting is active.
    pub fn is_json(&self) -> bool {
        self.json
    }
}

/// Build the level filter, preferring `RUST_LOG` directives when present.
pub(crate) fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Filter(e.to_string()))
}

/// Install the global `tracing` subscriber.
///
/// Fails if a subscriber is already installed or the filter directive does
/// not parse.
pub fn init_logging(config: &TelemetryConfig) -> Result<LoggingGuard, TelemetryError> {
    let env_filter = build_filter(config)?;

    if !config.console_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
        return Ok(LoggingGuard { json: false });
    }

    if config.json_logs {
        // JSON output for containers/production
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    } else {
        // Pretty output for development
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    }

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        json_logs = config.json_logs,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        json: config.json_logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_directives() {
        let config = TelemetryConfig::default().with_log_level("query_gateway=debug,info");
        assert!(build_filter(&config).is_ok());
    }

    // Installing the global subscriber is process-wide, so the init path is
    // exercised once here and nowhere else in this crate.
    #[test]
    fn test_init_then_reinit_fails() {
        let config = TelemetryConfig::default().with_log_level("warn");
        let first = init_logging(&config);
        assert!(first.is_ok());
        assert!(matches!(
            init_logging(&config),
            Err(TelemetryError::SubscriberInit(_))
        ));
    }
}
