//! Structured logging.
//!
//! # Responsibilities
//! - Turn a `LoggerConfig` into a `tracing::Dispatch`
//! - Optionally install it as the process-wide default
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Building a dispatch never touches global state; installing is a separate step

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggerConfig};

/// Error type for logging setup.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Build a dispatch for the configured level and format.
pub fn build_dispatch(config: &LoggerConfig) -> Result<Dispatch, LoggingError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|source| LoggingError::Filter {
        directive: config.level.clone(),
        source,
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let dispatch = match config.format {
        LogFormat::Pretty => Dispatch::new(builder.pretty().finish()),
        LogFormat::Compact => Dispatch::new(builder.compact().finish()),
        LogFormat::Json => Dispatch::new(builder.json().finish()),
    };

    Ok(dispatch)
}

/// Install `dispatch` as the global default subscriber.
pub fn install_global(dispatch: &Dispatch) -> Result<(), LoggingError> {
    tracing::dispatcher::set_global_default(dispatch.clone())
        .map_err(|_| LoggingError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_every_format() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            let config = LoggerConfig {
                format,
                install_global: false,
                ..LoggerConfig::default()
            };
            assert!(build_dispatch(&config).is_ok());
        }
    }

    #[test]
    fn test_rejects_bad_directive() {
        let config = LoggerConfig {
            level: "app_bootstrap=loud".into(),
            install_global: false,
            ..LoggerConfig::default()
        };
        assert!(matches!(
            build_dispatch(&config),
            Err(LoggingError::Filter { .. })
        ));
    }
}
