//! Error types shared by the orchestrator and its subsystems.
//!
//! # Taxonomy
//! ```text
//! State errors        → AlreadyInitialized / NotInitialized / AlreadyStarted
//! Hook errors         → Hook { phase, source }           (init/start only)
//! Construction errors → Construct { kind, source }
//! Start errors        → Start { kind, source }
//! Runtime faults      → Fault { kind, source }           (unblocks Start)
//! Shutdown errors     → never returned, collected in ShutdownReport
//! ```

use std::time::Duration;

use crate::config::loader::ConfigError;
use crate::lifecycle::hooks::HookPhase;
use crate::subsystem::SubsystemKind;

/// Type-erased error produced by collaborators (hooks, custom subsystems).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by [`Bootstrap`](crate::Bootstrap) operations.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("bootstrap is already initialized")]
    AlreadyInitialized,

    #[error("bootstrap is not initialized")]
    NotInitialized,

    #[error("bootstrap is already started")]
    AlreadyStarted,

    #[error("{phase} hook failed: {source}")]
    Hook {
        phase: HookPhase,
        #[source]
        source: BoxError,
    },

    #[error("failed to construct {kind}: {source}")]
    Construct {
        kind: SubsystemKind,
        #[source]
        source: SubsystemError,
    },

    #[error("failed to start {kind}: {source}")]
    Start {
        kind: SubsystemKind,
        #[source]
        source: SubsystemError,
    },

    #[error("{kind} reported a fatal error: {source}")]
    Fault {
        kind: SubsystemKind,
        #[source]
        source: SubsystemError,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BootstrapError {
    /// The subsystem this error is attributed to, if any.
    pub fn subsystem(&self) -> Option<SubsystemKind> {
        match self {
            BootstrapError::Construct { kind, .. }
            | BootstrapError::Start { kind, .. }
            | BootstrapError::Fault { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Errors produced by subsystem handles and their constructors.
#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
    #[error("handle is closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(BoxError),
}

impl SubsystemError {
    /// Wrap an arbitrary collaborator error.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        SubsystemError::Other(err.into())
    }
}

impl From<BoxError> for SubsystemError {
    fn from(err: BoxError) -> Self {
        SubsystemError::Other(err)
    }
}
