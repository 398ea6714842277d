//! Logger subsystem: the tracing dispatch every other step logs through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Dispatch;

use crate::config::LoggerConfig;
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::observability::logging::{self, LoggingError};
use crate::subsystem::{Constructor, Subsystem};

pub use crate::config::LogFormat;

pub struct Logger {
    dispatch: Dispatch,
    global: bool,
    closed: AtomicBool,
}

impl Logger {
    pub fn new(config: &LoggerConfig) -> Result<Self, SubsystemError> {
        let dispatch = logging::build_dispatch(config)
            .map_err(|e| SubsystemError::InvalidConfig(e.to_string()))?;

        let mut global = false;
        if config.install_global {
            match logging::install_global(&dispatch) {
                Ok(()) => global = true,
                Err(LoggingError::AlreadyInstalled) => {
                    tracing::warn!("Global subscriber already installed, keeping it");
                }
                Err(e) => return Err(SubsystemError::InvalidConfig(e.to_string())),
            }
        }

        Ok(Self {
            dispatch,
            global,
            closed: AtomicBool::new(false),
        })
    }

    /// The dispatch peers can log through, regardless of global installation.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Whether this logger became the process-wide default.
    pub fn is_global(&self) -> bool {
        self.global
    }
}

#[async_trait]
impl Subsystem for Logger {
    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubsystemError::Closed);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info!("Logger closed");
        });
        Ok(())
    }
}

#[async_trait]
impl Constructor for LoggerConfig {
    async fn construct(&self, _ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(Logger::new(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> LoggerConfig {
        LoggerConfig {
            install_global: false,
            ..LoggerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let logger = Logger::new(&local_config()).unwrap();
        assert!(!logger.is_global());
        assert!(logger.health_check(&Context::background()).await.is_ok());

        logger.close().await.unwrap();
        logger.close().await.unwrap();
        assert!(matches!(
            logger.health_check(&Context::background()).await,
            Err(SubsystemError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_invalid_level_fails_construction() {
        let config = LoggerConfig {
            level: "app_bootstrap=loud".into(),
            ..local_config()
        };
        assert!(config.construct(&Context::background()).await.is_err());
    }
}
