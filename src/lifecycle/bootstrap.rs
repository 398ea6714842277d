//! The lifecycle orchestrator.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{AppConfig, LifecycleConfig};
use crate::error::BootstrapError;
use crate::health::{self, HealthReport};
use crate::lifecycle::context::Context;
use crate::lifecycle::hooks::{self, Hook, HookContext, HookPhase, HookRegistry, HookResult};
use crate::lifecycle::phase::Phase;
use crate::lifecycle::shutdown::{self, ShutdownReport, ShutdownStep};
use crate::lifecycle::signals;
use crate::lifecycle::startup::{self, InitFailure};
use crate::observability::metrics;
use crate::subsystem::{Constructor, Fault, FaultSender, Handles, Subsystem, SubsystemKind};

/// Capacity of the runtime fault channel; one report is enough to leave Start.
const FAULT_CHANNEL_CAPACITY: usize = 8;

/// Collects subsystem constructors and lifecycle settings.
#[derive(Default)]
pub struct BootstrapBuilder {
    constructors: BTreeMap<SubsystemKind, Arc<dyn Constructor>>,
    lifecycle: LifecycleConfig,
}

impl BootstrapBuilder {
    /// Use `constructor` for `kind`, replacing any previous one.
    pub fn subsystem(mut self, kind: SubsystemKind, constructor: impl Constructor) -> Self {
        self.constructors.insert(kind, Arc::new(constructor));
        self
    }

    pub fn logger(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::Logger, constructor)
    }

    pub fn database(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::Database, constructor)
    }

    pub fn cache(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::Cache, constructor)
    }

    pub fn broker(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::Broker, constructor)
    }

    pub fn identity_client(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::IdentityClient, constructor)
    }

    pub fn http_client(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::HttpClient, constructor)
    }

    pub fn scheduler(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::Scheduler, constructor)
    }

    pub fn server(self, constructor: impl Constructor) -> Self {
        self.subsystem(SubsystemKind::Server, constructor)
    }

    pub fn lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn build(self) -> Bootstrap {
        Bootstrap {
            constructors: self.constructors,
            lifecycle: self.lifecycle,
            root: Context::background(),
            state: Mutex::new(State::default()),
        }
    }
}

#[derive(Default)]
struct State {
    phase: Phase,
    handles: Handles,
    hooks: HookRegistry,
}

/// Brings subsystems up, runs hooks around each phase and tears everything down.
///
/// All methods take `&self`; share it behind an `Arc` to call
/// [`shutdown`](Self::shutdown) or [`health`](Self::health) from other tasks.
pub struct Bootstrap {
    constructors: BTreeMap<SubsystemKind, Arc<dyn Constructor>>,
    lifecycle: LifecycleConfig,
    root: Context,
    state: Mutex<State>,
}

impl Bootstrap {
    pub fn builder() -> BootstrapBuilder {
        BootstrapBuilder::default()
    }

    /// A bootstrap with no subsystems and default lifecycle settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Map every configured section to its built-in constructor.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut builder = Self::builder().lifecycle(config.lifecycle.clone());
        if let Some(c) = &config.logger {
            builder = builder.logger(c.clone());
        }
        if let Some(c) = &config.database {
            builder = builder.database(c.clone());
        }
        if let Some(c) = &config.cache {
            builder = builder.cache(c.clone());
        }
        if let Some(c) = &config.broker {
            builder = builder.broker(c.clone());
        }
        if let Some(c) = &config.identity {
            builder = builder.identity_client(c.clone());
        }
        if let Some(c) = &config.http_client {
            builder = builder.http_client(c.clone());
        }
        if let Some(c) = &config.scheduler {
            builder = builder.scheduler(c.clone());
        }
        if let Some(c) = &config.server {
            builder = builder.server(c.clone());
        }
        builder.build()
    }

    fn register<F, Fut>(&self, phase: HookPhase, f: F) -> &Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.state.lock().hooks.push(phase, Hook::new(f));
        self
    }

    pub fn before_init<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.register(HookPhase::BeforeInit, f)
    }

    pub fn after_init<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.register(HookPhase::AfterInit, f)
    }

    pub fn before_start<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.register(HookPhase::BeforeStart, f)
    }

    pub fn after_start<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.register(HookPhase::AfterStart, f)
    }

    pub fn before_stop<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.register(HookPhase::BeforeStop, f)
    }

    pub fn after_stop<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.register(HookPhase::AfterStop, f)
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Snapshot of the live handles.
    pub fn handles(&self) -> Handles {
        self.state.lock().handles.clone()
    }

    /// Typed access to a live handle, e.g. `bootstrap.subsystem::<Database>(SubsystemKind::Database)`.
    pub fn subsystem<T: Subsystem>(&self, kind: SubsystemKind) -> Option<Arc<T>> {
        self.state.lock().handles.get::<T>(kind)
    }

    /// The process-wide scope; cancelled by [`shutdown`](Self::shutdown).
    pub fn root_context(&self) -> &Context {
        &self.root
    }

    pub fn lifecycle_config(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    fn hooks(&self, phase: HookPhase) -> Vec<Hook> {
        self.state.lock().hooks.snapshot(phase)
    }

    fn set_phase(&self, phase: Phase) {
        self.state.lock().phase = phase;
    }

    fn take_handles(&self) -> Handles {
        std::mem::take(&mut self.state.lock().handles)
    }

    /// Construct every configured subsystem and run the init hooks.
    ///
    /// On failure every handle built so far is closed and the bootstrap
    /// returns to `Uninitialized`.
    pub async fn init(&self, ctx: &Context) -> Result<(), BootstrapError> {
        self.state.lock().phase.begin_init()?;
        let started = Instant::now();
        tracing::info!(subsystems = self.constructors.len(), "Initializing");

        match self.init_phases(ctx).await {
            Ok(()) => {
                self.set_phase(Phase::Initialized);
                let elapsed = started.elapsed();
                metrics::record_phase("init", elapsed);
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Initialized");
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Uninitialized);
                tracing::error!(error = %e, "Initialization failed");
                Err(e)
            }
        }
    }

    async fn init_phases(&self, ctx: &Context) -> Result<(), BootstrapError> {
        let hctx = HookContext::new(ctx.clone(), Handles::new());
        hooks::run_strict(HookPhase::BeforeInit, &self.hooks(HookPhase::BeforeInit), &hctx).await?;

        let handles = match startup::construct_all(ctx, &self.root, &self.constructors).await {
            Ok(handles) => handles,
            Err(InitFailure { error, constructed }) => {
                self.rollback(constructed).await;
                return Err(error);
            }
        };
        self.state.lock().handles = handles.clone();

        let hctx = HookContext::new(ctx.clone(), handles);
        let after = hooks::run_strict(HookPhase::AfterInit, &self.hooks(HookPhase::AfterInit), &hctx).await;
        drop(hctx);
        if let Err(e) = after {
            let constructed = self.take_handles();
            self.rollback(constructed).await;
            return Err(e);
        }
        Ok(())
    }

    /// Close handles outside of a regular Stop.
    async fn rollback(&self, handles: Handles) {
        if handles.is_empty() {
            return;
        }
        tracing::warn!(subsystems = ?handles.kinds(), "Releasing constructed subsystems");
        let mut report = ShutdownReport::begin();
        shutdown::release(handles, &Context::background(), self.lifecycle.close_timeout(), &mut report).await;
        if !report.is_clean() {
            tracing::warn!(failures = report.failures.len(), "Release finished with failures");
        }
    }

    /// Run the start hooks, start every subsystem, then wait.
    ///
    /// The phase stays `Starting` until every subsystem has started and the
    /// after-start hooks have finished, so a concurrent [`stop`](Self::stop)
    /// in that window is a no-op. A failure past the before-start hooks still
    /// leaves the phase `Started`, so the caller's Stop releases everything.
    ///
    /// Returns once `ctx` or the root scope is cancelled, a termination signal
    /// arrives, or a subsystem reports a fatal error. Does not stop anything.
    pub async fn start(&self, ctx: &Context) -> Result<(), BootstrapError> {
        self.state.lock().phase.begin_start()?;
        let started = Instant::now();
        let handles = self.handles();

        let hctx = HookContext::new(ctx.clone(), handles.clone());
        let before =
            hooks::run_strict(HookPhase::BeforeStart, &self.hooks(HookPhase::BeforeStart), &hctx).await;
        if let Err(e) = before {
            self.set_phase(Phase::Initialized);
            return Err(e);
        }

        let (tx, mut faults) = mpsc::channel(FAULT_CHANNEL_CAPACITY);
        let mut serving = self.start_subsystems(ctx, &handles, tx).await;
        if serving.is_ok() {
            serving =
                hooks::run_strict(HookPhase::AfterStart, &self.hooks(HookPhase::AfterStart), &hctx).await;
        }
        self.set_phase(Phase::Started);
        serving?;

        let elapsed = started.elapsed();
        metrics::record_phase("start", elapsed);
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Started");

        let handle_signals = self.lifecycle.handle_signals;
        let signal = async move {
            if handle_signals {
                signals::terminate().await
            } else {
                std::future::pending().await
            }
        };

        tokio::select! {
            _ = ctx.done() => {
                tracing::info!("Context ended, leaving start");
                Ok(())
            }
            _ = self.root.done() => {
                tracing::info!("Shutdown requested");
                Ok(())
            }
            name = signal => {
                tracing::info!(signal = name, "Termination signal received");
                Ok(())
            }
            Some(fault) = faults.recv() => {
                tracing::error!(kind = %fault.kind, error = %fault.error, "Subsystem reported a fatal error");
                Err(BootstrapError::Fault { kind: fault.kind, source: fault.error })
            }
        }
    }

    async fn start_subsystems(
        &self,
        ctx: &Context,
        handles: &Handles,
        tx: mpsc::Sender<Fault>,
    ) -> Result<(), BootstrapError> {
        for kind in SubsystemKind::ALL {
            if let Some(handle) = handles.handle(kind) {
                tracing::debug!(kind = %kind, "Starting subsystem");
                handle
                    .start(ctx, FaultSender::new(kind, tx.clone()))
                    .await
                    .map_err(|source| BootstrapError::Start { kind, source })?;
            }
        }
        Ok(())
    }

    /// Tear everything down in order, bounded by the shutdown timeout.
    ///
    /// A no-op unless the bootstrap is started. Hooks and the server drain
    /// share the one stop deadline; each `close` gets its own budget. After-stop
    /// hooks therefore see an already expired context when a before-stop hook
    /// used up the deadline.
    pub async fn stop(&self, ctx: &Context) -> ShutdownReport {
        let proceed = self.state.lock().phase.begin_stop();
        if !proceed {
            tracing::debug!(phase = %self.phase(), "Stop ignored, not started");
            return ShutdownReport::skipped();
        }

        let started = Instant::now();
        let ctx = ctx.with_timeout(self.lifecycle.shutdown_timeout());
        let mut report = ShutdownReport::begin();
        tracing::info!(timeout = ?self.lifecycle.shutdown_timeout(), "Stopping");

        let hctx = HookContext::new(ctx.clone(), self.handles());
        for err in hooks::run_lenient(HookPhase::BeforeStop, &self.hooks(HookPhase::BeforeStop), &hctx).await {
            report.fail(ShutdownStep::Hook(HookPhase::BeforeStop), err);
        }
        drop(hctx);

        let handles = self.take_handles();
        shutdown::release(handles, &ctx, self.lifecycle.close_timeout(), &mut report).await;

        let hctx = HookContext::new(ctx.clone(), Handles::new());
        for err in hooks::run_lenient(HookPhase::AfterStop, &self.hooks(HookPhase::AfterStop), &hctx).await {
            report.fail(ShutdownStep::Hook(HookPhase::AfterStop), err);
        }

        self.set_phase(Phase::Stopped);
        self.root.cancel();

        report.elapsed = started.elapsed();
        metrics::record_phase("stop", report.elapsed);
        tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            failures = report.failures.len(),
            "Stopped"
        );
        report
    }

    /// Init, Start, then a bounded Stop, whatever Start returned.
    pub async fn run(&self, ctx: &Context) -> Result<(), BootstrapError> {
        self.init(ctx).await?;

        let outcome = self.start(ctx).await;
        if let Err(e) = &outcome {
            tracing::error!(error = %e, "Start failed");
        }

        if self.phase() == Phase::Initialized {
            // Start never got as far as Started, so Stop would be a no-op.
            let handles = self.take_handles();
            self.rollback(handles).await;
            self.set_phase(Phase::Stopped);
            self.root.cancel();
        } else {
            let report = self.stop(&Context::background()).await;
            if !report.is_clean() {
                for failure in &report.failures {
                    tracing::warn!(step = %failure.step, error = %failure.error, "Shutdown failure");
                }
            }
        }

        outcome
    }

    /// Ask a running [`start`](Self::start) to return. Does not close anything.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Probe every live handle.
    pub async fn health(&self, ctx: &Context) -> HealthReport {
        let handles = self.handles();
        health::probe_all(&handles, ctx, self.lifecycle.health_probe_timeout()).await
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_bootstrap_walks_every_phase() {
        let bootstrap = Bootstrap::builder()
            .lifecycle(LifecycleConfig {
                handle_signals: false,
                ..LifecycleConfig::default()
            })
            .build();
        assert_eq!(bootstrap.phase(), Phase::Uninitialized);

        bootstrap.init(&Context::background()).await.unwrap();
        assert_eq!(bootstrap.phase(), Phase::Initialized);

        bootstrap.shutdown();
        bootstrap.start(&Context::background()).await.unwrap();
        assert_eq!(bootstrap.phase(), Phase::Started);

        let report = bootstrap.stop(&Context::background()).await;
        assert!(report.performed);
        assert!(report.is_clean());
        assert_eq!(bootstrap.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_bootstrap_is_terminal() {
        let bootstrap = Bootstrap::builder()
            .lifecycle(LifecycleConfig {
                handle_signals: false,
                ..LifecycleConfig::default()
            })
            .build();
        let ctx = Context::background();
        ctx.cancel();
        bootstrap.run(&ctx).await.unwrap();

        assert_eq!(bootstrap.phase(), Phase::Stopped);
        assert!(matches!(
            bootstrap.init(&Context::background()).await,
            Err(BootstrapError::AlreadyInitialized)
        ));
    }
}
