//! Ordered release of subsystem handles.
//!
//! # Order
//! ```text
//! Server (drain, then close)
//!     → Scheduler → Broker → Cache → Database → IdentityClient → HttpClient
//!     → Logger
//! ```
//!
//! Every step runs even when an earlier one failed. Failures are collected in
//! a [`ShutdownReport`], never returned as errors.

use std::fmt;
use std::time::Duration;

use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::lifecycle::hooks::HookPhase;
use crate::observability::metrics;
use crate::subsystem::{Handles, Subsystem, SubsystemKind};

/// Infrastructure close order, after the server and before the logger.
pub const CLOSE_ORDER: [SubsystemKind; 6] = [
    SubsystemKind::Scheduler,
    SubsystemKind::Broker,
    SubsystemKind::Cache,
    SubsystemKind::Database,
    SubsystemKind::IdentityClient,
    SubsystemKind::HttpClient,
];

/// One step of the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    Hook(HookPhase),
    Drain(SubsystemKind),
    Close(SubsystemKind),
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStep::Hook(phase) => write!(f, "{phase} hook"),
            ShutdownStep::Drain(kind) => write!(f, "drain {kind}"),
            ShutdownStep::Close(kind) => write!(f, "close {kind}"),
        }
    }
}

#[derive(Debug)]
pub struct ShutdownFailure {
    pub step: ShutdownStep,
    pub error: String,
}

/// Outcome of a `stop` call.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// False when `stop` was a no-op because the bootstrap was not started.
    pub performed: bool,
    pub elapsed: Duration,
    /// Subsystems whose `close` was invoked, in invocation order.
    pub closed: Vec<SubsystemKind>,
    pub failures: Vec<ShutdownFailure>,
}

impl ShutdownReport {
    pub fn skipped() -> Self {
        Self::default()
    }

    pub(crate) fn begin() -> Self {
        Self {
            performed: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, step: ShutdownStep, error: impl fmt::Display) {
        let error = error.to_string();
        tracing::warn!(step = %step, error = %error, "Shutdown step failed, continuing");
        metrics::record_shutdown_failure(step.to_string());
        self.failures.push(ShutdownFailure { step, error });
    }
}

/// Drain and close every handle in `handles`.
///
/// The server drain is bounded by `ctx`; each `close` has its own
/// `close_timeout` budget so an exhausted deadline never skips a resource.
pub(crate) async fn release(
    mut handles: Handles,
    ctx: &Context,
    close_timeout: Duration,
    report: &mut ShutdownReport,
) {
    if let Some(server) = handles.remove(SubsystemKind::Server) {
        let drained = match ctx.run(server.drain(ctx)).await {
            Ok(result) => result,
            Err(reason) => Err(SubsystemError::from(reason)),
        };
        if let Err(e) = drained {
            report.fail(ShutdownStep::Drain(SubsystemKind::Server), e);
        }
        close_one(SubsystemKind::Server, server.as_ref(), close_timeout, report).await;
    }

    for kind in CLOSE_ORDER {
        if let Some(handle) = handles.remove(kind) {
            close_one(kind, handle.as_ref(), close_timeout, report).await;
        }
    }

    if let Some(logger) = handles.remove(SubsystemKind::Logger) {
        close_one(SubsystemKind::Logger, logger.as_ref(), close_timeout, report).await;
    }
}

async fn close_one(
    kind: SubsystemKind,
    handle: &dyn Subsystem,
    budget: Duration,
    report: &mut ShutdownReport,
) {
    tracing::debug!(kind = %kind, "Closing subsystem");
    report.closed.push(kind);
    match tokio::time::timeout(budget, handle.close()).await {
        Ok(Ok(())) => tracing::info!(kind = %kind, "Subsystem closed"),
        Ok(Err(e)) => report.fail(ShutdownStep::Close(kind), e),
        Err(_) => report.fail(ShutdownStep::Close(kind), SubsystemError::Timeout(budget)),
    }
}
