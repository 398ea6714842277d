//! User-registered callbacks around lifecycle phase boundaries.
//!
//! # Semantics
//! - Hooks of one phase run strictly in registration order.
//! - During init/start the first failing hook aborts the rest of its list.
//! - During stop every hook runs; failures are logged and collected.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{BootstrapError, BoxError};
use crate::lifecycle::context::Context;
use crate::subsystem::Handles;

/// Outcome of a single hook invocation.
pub type HookResult = Result<(), BoxError>;

type HookFn = dyn Fn(HookContext) -> BoxFuture<'static, HookResult> + Send + Sync;

/// The phase boundary a hook is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    BeforeInit,
    AfterInit,
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
}

impl HookPhase {
    pub const ALL: [HookPhase; 6] = [
        HookPhase::BeforeInit,
        HookPhase::AfterInit,
        HookPhase::BeforeStart,
        HookPhase::AfterStart,
        HookPhase::BeforeStop,
        HookPhase::AfterStop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::BeforeInit => "before-init",
            HookPhase::AfterInit => "after-init",
            HookPhase::BeforeStart => "before-start",
            HookPhase::AfterStart => "after-start",
            HookPhase::BeforeStop => "before-stop",
            HookPhase::AfterStop => "after-stop",
        }
    }

    fn index(&self) -> usize {
        match self {
            HookPhase::BeforeInit => 0,
            HookPhase::AfterInit => 1,
            HookPhase::BeforeStart => 2,
            HookPhase::AfterStart => 3,
            HookPhase::BeforeStop => 4,
            HookPhase::AfterStop => 5,
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook receives: a cancellable scope plus the handles live at call time.
#[derive(Clone)]
pub struct HookContext {
    ctx: Context,
    handles: Handles,
}

impl HookContext {
    pub(crate) fn new(ctx: Context, handles: Handles) -> Self {
        Self { ctx, handles }
    }

    /// Subsystems constructed so far. Empty during before-init.
    pub fn handles(&self) -> &Handles {
        &self.handles
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl Deref for HookContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

/// A registered hook callback.
#[derive(Clone)]
pub struct Hook {
    inner: Arc<HookFn>,
}

impl Hook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |hctx| f(hctx).boxed()),
        }
    }

    pub async fn call(&self, hctx: HookContext) -> HookResult {
        (self.inner)(hctx).await
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

/// Six ordered hook lists, one per phase boundary.
#[derive(Debug, Default, Clone)]
pub struct HookRegistry {
    lists: [Vec<Hook>; 6],
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, phase: HookPhase, hook: Hook) {
        self.lists[phase.index()].push(hook);
    }

    /// Clone of the hooks for `phase`, in registration order.
    pub fn snapshot(&self, phase: HookPhase) -> Vec<Hook> {
        self.lists[phase.index()].clone()
    }

    pub fn len(&self, phase: HookPhase) -> usize {
        self.lists[phase.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(Vec::is_empty)
    }
}

/// Run hooks in order, aborting on the first failure.
pub(crate) async fn run_strict(
    phase: HookPhase,
    hooks: &[Hook],
    hctx: &HookContext,
) -> Result<(), BootstrapError> {
    for (index, hook) in hooks.iter().enumerate() {
        tracing::debug!(phase = %phase, index, "Running hook");
        if let Err(source) = hook.call(hctx.clone()).await {
            tracing::error!(phase = %phase, index, error = %source, "Hook failed, aborting phase");
            return Err(BootstrapError::Hook { phase, source });
        }
    }
    Ok(())
}

/// Run every hook, each bounded by the context; collect failures instead of aborting.
pub(crate) async fn run_lenient(
    phase: HookPhase,
    hooks: &[Hook],
    hctx: &HookContext,
) -> Vec<BoxError> {
    let mut failures = Vec::new();
    for (index, hook) in hooks.iter().enumerate() {
        let outcome = match hctx.run(hook.call(hctx.clone())).await {
            Ok(result) => result,
            Err(reason) => Err(BoxError::from(reason)),
        };
        if let Err(err) = outcome {
            tracing::warn!(phase = %phase, index, error = %err, "Hook failed, continuing shutdown");
            failures.push(err);
        }
    }
    failures
}
