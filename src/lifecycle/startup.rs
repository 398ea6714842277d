//! Concurrent subsystem construction.
//!
//! # Responsibilities
//! - Construct the logger first, on its own
//! - Construct every other configured subsystem concurrently, one task each
//! - Fail fast: the first error cancels the shared scope and aborts stragglers
//! - Hand back whatever was built so the caller can release it
//! - Wire peers together once everything is constructed

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::task::JoinSet;

use crate::error::{BootstrapError, SubsystemError};
use crate::lifecycle::context::Context;
use crate::observability::metrics;
use crate::subsystem::{Constructor, Handles, Subsystem, SubsystemKind};

/// A failed construction pass together with the handles it managed to build.
pub(crate) struct InitFailure {
    pub error: BootstrapError,
    pub constructed: Handles,
}

/// Build every configured subsystem.
///
/// All constructors share one scope derived from `root` that also ends with
/// `ctx`. The scope is cancelled before this returns, whatever the outcome.
pub(crate) async fn construct_all(
    ctx: &Context,
    root: &Context,
    constructors: &BTreeMap<SubsystemKind, Arc<dyn Constructor>>,
) -> Result<Handles, InitFailure> {
    let scope = root.join(ctx);
    let result = construct_in(&scope, constructors).await;
    scope.cancel();
    result
}

async fn construct_in(
    scope: &Context,
    constructors: &BTreeMap<SubsystemKind, Arc<dyn Constructor>>,
) -> Result<Handles, InitFailure> {
    let mut handles = Handles::new();

    // Peers may log through the logger, so it has to exist before they start.
    if let Some(constructor) = constructors.get(&SubsystemKind::Logger) {
        match construct_one(SubsystemKind::Logger, constructor.as_ref(), scope).await {
            Ok(handle) => handles.insert(SubsystemKind::Logger, handle),
            Err(source) => {
                return Err(InitFailure {
                    error: BootstrapError::Construct {
                        kind: SubsystemKind::Logger,
                        source,
                    },
                    constructed: handles,
                })
            }
        }
    }

    let mut tasks = JoinSet::new();
    for (&kind, constructor) in constructors {
        if kind == SubsystemKind::Logger {
            continue;
        }
        let constructor = Arc::clone(constructor);
        let task_scope = scope.clone();
        tasks.spawn(async move {
            let outcome = construct_one(kind, constructor.as_ref(), &task_scope).await;
            (kind, outcome)
        });
    }

    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((kind, Ok(handle))) => handles.insert(kind, handle),
            Ok((kind, Err(source))) => {
                failure = Some(BootstrapError::Construct { kind, source });
                break;
            }
            Err(e) => {
                failure = Some(BootstrapError::Task(e));
                break;
            }
        }
    }

    if let Some(error) = failure {
        tracing::error!(error = %error, pending = tasks.len(), "Construction failed, cancelling siblings");
        scope.cancel();
        tasks.abort_all();
        // Siblings that finished before the abort landed still need releasing.
        while let Some(joined) = tasks.join_next().await {
            if let Ok((kind, Ok(handle))) = joined {
                handles.insert(kind, handle);
            }
        }
        return Err(InitFailure {
            error,
            constructed: handles,
        });
    }

    for (kind, handle) in handles.iter() {
        tracing::trace!(kind = %kind, "Attaching peers");
        handle.attach(&handles);
    }

    Ok(handles)
}

/// Run one constructor inside `scope`, turning panics into errors.
async fn construct_one(
    kind: SubsystemKind,
    constructor: &dyn Constructor,
    scope: &Context,
) -> Result<Arc<dyn Subsystem>, SubsystemError> {
    let started = Instant::now();
    tracing::debug!(kind = %kind, "Constructing subsystem");

    let guarded = AssertUnwindSafe(constructor.construct(scope)).catch_unwind();
    let handle = match scope.run(guarded).await? {
        Ok(result) => result?,
        Err(panic) => return Err(SubsystemError::Panicked(panic_message(panic))),
    };

    let elapsed = started.elapsed();
    metrics::record_construct(kind, elapsed);
    tracing::info!(kind = %kind, elapsed_ms = elapsed.as_millis() as u64, "Subsystem constructed");
    Ok(handle)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
