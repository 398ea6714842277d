//! Shared utilities for lifecycle integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use app_bootstrap::config::LifecycleConfig;
use app_bootstrap::subsystem::FaultSender;
use app_bootstrap::{Bootstrap, Constructor, Context, Phase, Subsystem, SubsystemError, SubsystemKind};

/// Ordered record of everything the mocks and hooks did.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().iter().any(|e| e == event)
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    /// Events starting with `prefix`, in order.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Lifecycle settings that never touch process signals.
pub fn test_lifecycle(shutdown_timeout_ms: u64) -> LifecycleConfig {
    LifecycleConfig {
        shutdown_timeout_ms,
        close_timeout_ms: 500,
        health_probe_timeout_ms: 200,
        handle_signals: false,
    }
}

/// A subsystem whose behaviour is programmed by its [`MockConstructor`].
pub struct MockSubsystem {
    kind: SubsystemKind,
    log: EventLog,
    healthy: bool,
    health_delay: Duration,
    fault_after: Option<Duration>,
    start_delay: Duration,
    start_fails: bool,
}

impl MockSubsystem {
    pub fn kind(&self) -> SubsystemKind {
        self.kind
    }
}

#[async_trait]
impl Subsystem for MockSubsystem {
    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        tokio::time::sleep(self.health_delay).await;
        if self.healthy {
            Ok(())
        } else {
            Err(SubsystemError::Unavailable(format!("{} is down", self.kind)))
        }
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        self.log.push(format!("close:{}", self.kind));
        Ok(())
    }

    async fn start(&self, _ctx: &Context, faults: FaultSender) -> Result<(), SubsystemError> {
        tokio::time::sleep(self.start_delay).await;
        if self.start_fails {
            self.log.push(format!("start-failed:{}", self.kind));
            return Err(SubsystemError::Unavailable(format!("{} cannot serve", self.kind)));
        }
        self.log.push(format!("start:{}", self.kind));
        if let Some(delay) = self.fault_after {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                faults.report(SubsystemError::Unavailable("listener lost".into()));
            });
        }
        Ok(())
    }

    async fn drain(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        self.log.push(format!("drain:{}", self.kind));
        Ok(())
    }
}

/// Programmable constructor: delay, failure, health outcome, runtime fault.
#[derive(Clone)]
pub struct MockConstructor {
    kind: SubsystemKind,
    log: EventLog,
    delay: Duration,
    fail: bool,
    healthy: bool,
    health_delay: Duration,
    fault_after: Option<Duration>,
    start_delay: Duration,
    start_fails: bool,
    calls: Arc<AtomicUsize>,
}

impl MockConstructor {
    pub fn new(kind: SubsystemKind, log: &EventLog) -> Self {
        Self {
            kind,
            log: log.clone(),
            delay: Duration::ZERO,
            fail: false,
            healthy: true,
            health_delay: Duration::ZERO,
            fault_after: None,
            start_delay: Duration::ZERO,
            start_fails: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn slow_health(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    pub fn fault_after(mut self, delay: Duration) -> Self {
        self.fault_after = Some(delay);
        self
    }

    pub fn slow_start(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.start_fails = true;
        self
    }

    /// Number of `construct` calls so far, shared across clones.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Constructor for MockConstructor {
    async fn construct(&self, _ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("construct:{}", self.kind));
        tokio::time::sleep(self.delay).await;
        if self.fail {
            self.log.push(format!("failed:{}", self.kind));
            return Err(SubsystemError::Unavailable(format!("{} refused", self.kind)));
        }
        self.log.push(format!("constructed:{}", self.kind));
        Ok(Arc::new(MockSubsystem {
            kind: self.kind,
            log: self.log.clone(),
            healthy: self.healthy,
            health_delay: self.health_delay,
            fault_after: self.fault_after,
            start_delay: self.start_delay,
            start_fails: self.start_fails,
        }))
    }
}

/// Poll until `bootstrap` reaches `phase`, panicking after two seconds.
pub async fn wait_for_phase(bootstrap: &Bootstrap, phase: Phase) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while bootstrap.phase() != phase {
        assert!(
            tokio::time::Instant::now() < deadline,
            "bootstrap stuck in {} waiting for {}",
            bootstrap.phase(),
            phase
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
