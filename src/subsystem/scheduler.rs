//! Periodic job scheduler.
//!
//! Jobs are registered before Start (typically from an after-init hook) and run
//! on fixed intervals until the scheduler is closed. A failing run is logged and
//! the job keeps its schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{BoxError, SubsystemError};
use crate::lifecycle::context::Context;
use crate::subsystem::{Constructor, FaultSender, Subsystem};

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

#[derive(Clone)]
struct Job {
    name: String,
    interval: Duration,
    run: JobFn,
}

pub struct Scheduler {
    jobs: Mutex<Vec<Job>>,
    tasks: Mutex<Option<JoinSet<()>>>,
    token: CancellationToken,
    stop_grace: Duration,
    fire_immediately: bool,
    closed: AtomicBool,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            tasks: Mutex::new(None),
            token: CancellationToken::new(),
            stop_grace: Duration::from_secs(config.stop_grace_secs),
            fire_immediately: config.fire_immediately,
            closed: AtomicBool::new(false),
        }
    }

    /// Register a job to run every `interval` once the scheduler starts.
    pub fn every<F, Fut>(&self, name: impl Into<String>, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let job = Job {
            name: name.into(),
            interval,
            run: Arc::new(move || job().boxed()),
        };
        tracing::debug!(job = %job.name, interval = ?interval, "Job registered");
        self.jobs.lock().push(job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some() && !self.token.is_cancelled()
    }
}

async fn run_job(job: Job, token: CancellationToken, fire_immediately: bool) {
    let start = if fire_immediately {
        tokio::time::Instant::now()
    } else {
        tokio::time::Instant::now() + job.interval
    };
    let mut ticker = tokio::time::interval_at(start, job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = (job.run)().await {
                    tracing::warn!(job = %job.name, error = %e, "Scheduled job failed");
                }
            }
        }
    }
    tracing::debug!(job = %job.name, "Job stopped");
}

#[async_trait]
impl Subsystem for Scheduler {
    async fn start(&self, _ctx: &Context, _faults: FaultSender) -> Result<(), SubsystemError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubsystemError::Closed);
        }

        let jobs = self.jobs.lock().clone();
        let mut tasks = JoinSet::new();
        for job in jobs {
            if job.interval.is_zero() {
                return Err(SubsystemError::InvalidConfig(format!(
                    "job {} has a zero interval",
                    job.name
                )));
            }
            tasks.spawn(run_job(job, self.token.child_token(), self.fire_immediately));
        }

        tracing::info!(jobs = tasks.len(), "Scheduler started");
        *self.tasks.lock() = Some(tasks);
        Ok(())
    }

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
        self.token.cancel();

        let tasks = self.tasks.lock().take();
        if let Some(mut tasks) = tasks {
            let drained = tokio::time::timeout(self.stop_grace, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(remaining = tasks.len(), "Jobs still running after grace period, aborting");
                tasks.abort_all();
            }
        }

        tracing::info!("Scheduler closed");
        Ok(())
    }
}

#[async_trait]
impl Constructor for SchedulerConfig {
    async fn construct(&self, _ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(Scheduler::new(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    use crate::subsystem::SubsystemKind;

    fn faults() -> FaultSender {
        let (tx, _rx) = mpsc::channel(1);
        FaultSender::new(SubsystemKind::Scheduler, tx)
    }

    #[tokio::test]
    async fn test_jobs_run_until_closed() {
        let scheduler = Scheduler::new(&SchedulerConfig {
            stop_grace_secs: 1,
            fire_immediately: true,
        });
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        scheduler.every("tick", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert_eq!(scheduler.job_count(), 1);

        scheduler.start(&Context::background(), faults()).await.unwrap();
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.close().await.unwrap();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several runs, got {seen}");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_failing_job_keeps_its_schedule() {
        let scheduler = Scheduler::new(&SchedulerConfig {
            stop_grace_secs: 1,
            fire_immediately: true,
        });
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        scheduler.every("flaky", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), BoxError>("boom".into())
            }
        });

        scheduler.start(&Context::background(), faults()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.close().await.unwrap();
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_close_without_start() {
        let scheduler = Scheduler::new(&SchedulerConfig::default());
        scheduler.close().await.unwrap();
        assert!(scheduler.health_check(&Context::background()).await.is_err());
        assert!(scheduler.start(&Context::background(), faults()).await.is_err());
    }
}
