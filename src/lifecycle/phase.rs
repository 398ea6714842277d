//! Orchestrator phase state machine.
//!
//! # States
//! ```text
//! Uninitialized → Initializing → Initialized → Starting → Started → Stopping → Stopped
//!       ↑______________|  (init failed)  ↑________|  (before-start hook failed)
//! ```
//!
//! The transient `*ing` states exist so that the lock only has to be held for
//! the check-and-set, never across construction or hook execution.

use std::fmt;

use crate::error::BootstrapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Initializing => "initializing",
            Phase::Initialized => "initialized",
            Phase::Starting => "starting",
            Phase::Started => "started",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        }
    }

    /// Check-and-set for `Init`.
    pub(crate) fn begin_init(&mut self) -> Result<(), BootstrapError> {
        match self {
            Phase::Uninitialized => {
                *self = Phase::Initializing;
                Ok(())
            }
            _ => Err(BootstrapError::AlreadyInitialized),
        }
    }

    /// Check-and-set for `Start`.
    pub(crate) fn begin_start(&mut self) -> Result<(), BootstrapError> {
        match self {
            Phase::Initialized => {
                *self = Phase::Starting;
                Ok(())
            }
            Phase::Starting | Phase::Started => Err(BootstrapError::AlreadyStarted),
            _ => Err(BootstrapError::NotInitialized),
        }
    }

    /// Check-and-set for `Stop`. Returns false when Stop should be a no-op.
    pub(crate) fn begin_stop(&mut self) -> bool {
        match self {
            Phase::Started => {
                *self = Phase::Stopping;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_only_from_uninitialized() {
        let mut phase = Phase::Uninitialized;
        assert!(phase.begin_init().is_ok());
        assert_eq!(phase, Phase::Initializing);
        assert!(matches!(phase.begin_init(), Err(BootstrapError::AlreadyInitialized)));

        let mut stopped = Phase::Stopped;
        assert!(matches!(stopped.begin_init(), Err(BootstrapError::AlreadyInitialized)));
    }

    #[test]
    fn test_start_errors() {
        let mut phase = Phase::Uninitialized;
        assert!(matches!(phase.begin_start(), Err(BootstrapError::NotInitialized)));
        assert_eq!(phase, Phase::Uninitialized);

        let mut started = Phase::Started;
        assert!(matches!(started.begin_start(), Err(BootstrapError::AlreadyStarted)));

        let mut stopped = Phase::Stopped;
        assert!(matches!(stopped.begin_start(), Err(BootstrapError::NotInitialized)));
    }

    #[test]
    fn test_stop_is_noop_unless_started() {
        for mut phase in [Phase::Uninitialized, Phase::Initialized, Phase::Stopped] {
            let before = phase;
            assert!(!phase.begin_stop());
            assert_eq!(phase, before);
        }
        let mut phase = Phase::Started;
        assert!(phase.begin_stop());
        assert_eq!(phase, Phase::Stopping);
    }
}
