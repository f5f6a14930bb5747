//! Structured logging.
//!
//! `RUST_LOG` takes precedence over `observability.log_level`. The format is
//! JSON for production and pretty for development.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{value}': {source}")]
    Filter { value: String, source: ParseError },

    #[error("failed to install subscriber: {0}")]
    Install(Box<dyn std::error::Error + Send + Sync>),
}

/// Install the global tracing subscriber.
pub fn init(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|source| LoggingError::Filter {
            value: config.log_level.clone(),
            source,
        })?,
    };

    let builder = fmt().with_env_filter(filter).with_target(true);
    match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    }
    .map_err(LoggingError::Install)
}
