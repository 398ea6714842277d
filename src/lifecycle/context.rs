//! Cancellation scopes passed to hooks, constructors and health probes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SubsystemError;

/// Why a [`Context`] ended before the guarded work completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl From<ContextError> for SubsystemError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => SubsystemError::Cancelled,
            ContextError::DeadlineExceeded => SubsystemError::DeadlineExceeded,
        }
    }
}

/// A cloneable cancellation scope with an optional deadline.
///
/// Cancelling a context cancels every context derived from it; the reverse
/// does not hold. Deadlines only ever shrink when deriving.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A root scope that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a scope that can be cancelled independently of its parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child scope that additionally ends after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child of `self` that is also cancelled when `other` is.
    ///
    /// The relay task exits as soon as either scope is cancelled, so callers
    /// should cancel the returned context once they are done with it.
    pub fn join(&self, other: &Context) -> Self {
        let deadline = match (self.deadline, other.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let joined = Self {
            token: self.token.child_token(),
            deadline,
        };

        let token = joined.token.clone();
        let upstream = other.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = upstream.cancelled() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        joined
    }

    /// Cancel this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the scope was cancelled or its deadline passed.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Drive `fut` until it completes or the scope ends, whichever is first.
    ///
    /// When the scope ends first the future is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if self.token.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        tokio::select! {
            biased;
            out = fut => Ok(out),
            _ = self.done() => Err(self.reason()),
        }
    }

    fn reason(&self) -> ContextError {
        if self.token.is_cancelled() {
            ContextError::Cancelled
        } else {
            ContextError::DeadlineExceeded
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
