//! Tracing subscriber setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Internal(format!("invalid log filter '{}': {e}", config.level)))?;

    let (json, pretty) = match config.format.as_str() {
        "pretty" => (None, Some(fmt::layer().pretty())),
        _ => (Some(fmt::layer().json().with_current_span(false)), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| AppError::Internal(format!("failed to install tracing subscriber: {e}")))
}
