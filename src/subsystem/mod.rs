//! Subsystem contract and built-in adapters.
//!
//! # Data Flow
//! ```text
//! *Config (or custom Constructor)
//!     → construct(ctx)             (logger first, the rest concurrently)
//!     → Arc<dyn Subsystem>          (stored in Handles, owned by Bootstrap)
//!     → attach(&handles)           (post-join wiring)
//!     → start(ctx, faults)         (Start phase)
//!     → health_check(ctx)*         (any time while live)
//!     → drain(ctx) / close()       (Stop phase)
//! ```
//!
//! # Design Decisions
//! - The set of subsystem identities is closed: one enum variant each
//! - A handle is constructed at most once per Init and closed at most once per Stop
//! - Adapters keep their own interior state; the orchestrator only holds `Arc`s

pub mod broker;
pub mod cache;
pub mod database;
pub mod http_client;
pub mod identity;
pub mod logger;
pub mod scheduler;
pub mod server;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::SubsystemError;
use crate::lifecycle::context::Context;

pub use broker::Broker;
pub use cache::Cache;
pub use database::{Database, PoolStatus};
pub use http_client::HttpClient;
pub use identity::{IdentityClient, ProviderMetadata};
pub use logger::Logger;
pub use scheduler::Scheduler;
pub use server::Server;

/// Identity of one infrastructure collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemKind {
    Logger,
    Database,
    Cache,
    Broker,
    IdentityClient,
    HttpClient,
    Scheduler,
    Server,
}

impl SubsystemKind {
    pub const ALL: [SubsystemKind; 8] = [
        SubsystemKind::Logger,
        SubsystemKind::Database,
        SubsystemKind::Cache,
        SubsystemKind::Broker,
        SubsystemKind::IdentityClient,
        SubsystemKind::HttpClient,
        SubsystemKind::Scheduler,
        SubsystemKind::Server,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubsystemKind::Logger => "logger",
            SubsystemKind::Database => "database",
            SubsystemKind::Cache => "cache",
            SubsystemKind::Broker => "broker",
            SubsystemKind::IdentityClient => "identity_client",
            SubsystemKind::HttpClient => "http_client",
            SubsystemKind::Scheduler => "scheduler",
            SubsystemKind::Server => "server",
        }
    }
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal runtime error reported by a started subsystem.
#[derive(Debug)]
pub struct Fault {
    pub kind: SubsystemKind,
    pub error: SubsystemError,
}

/// Sending half of the fault channel, tagged with the reporting subsystem.
#[derive(Debug, Clone)]
pub struct FaultSender {
    kind: SubsystemKind,
    tx: mpsc::Sender<Fault>,
}

impl FaultSender {
    pub(crate) fn new(kind: SubsystemKind, tx: mpsc::Sender<Fault>) -> Self {
        Self { kind, tx }
    }

    /// Report a fatal error. Drops the report if nobody is waiting any more.
    pub fn report(&self, error: SubsystemError) {
        if let Err(e) = self.tx.try_send(Fault {
            kind: self.kind,
            error,
        }) {
            tracing::debug!(kind = %self.kind, error = %e, "Fault report dropped");
        }
    }
}

/// Upcast support so typed handles can be recovered from `Arc<dyn Subsystem>`.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A live, constructed subsystem handle.
#[async_trait]
pub trait Subsystem: AsAny {
    /// Report whether the handle is currently usable.
    async fn health_check(&self, ctx: &Context) -> Result<(), SubsystemError>;

    /// Release the underlying resources. Must tolerate a handle that was never started.
    async fn close(&self) -> Result<(), SubsystemError>;

    /// Wire references to peers after every subsystem has been constructed.
    fn attach(&self, _peers: &Handles) {}

    /// Begin serving. Fatal errors after this returns go through `faults`.
    async fn start(&self, _ctx: &Context, _faults: FaultSender) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Stop accepting new work and wait for in-flight work, bounded by `ctx`.
    async fn drain(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        Ok(())
    }
}

/// Builds a subsystem handle from its configuration.
#[async_trait]
pub trait Constructor: Send + Sync + 'static {
    async fn construct(&self, ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError>;
}

/// Closure-backed [`Constructor`].
pub struct FnConstructor<F> {
    f: F,
}

/// Adapt an async closure into a [`Constructor`].
pub fn constructor_fn<F, Fut>(f: F) -> FnConstructor<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn Subsystem>, SubsystemError>> + Send + 'static,
{
    FnConstructor { f }
}

#[async_trait]
impl<F, Fut> Constructor for FnConstructor<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn Subsystem>, SubsystemError>> + Send + 'static,
{
    async fn construct(&self, ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        (self.f)(ctx.clone()).await
    }
}

/// Live handles keyed by subsystem identity.
#[derive(Clone, Default)]
pub struct Handles {
    inner: BTreeMap<SubsystemKind, Arc<dyn Subsystem>>,
}

impl Handles {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, kind: SubsystemKind, handle: Arc<dyn Subsystem>) {
        self.inner.insert(kind, handle);
    }

    pub(crate) fn remove(&mut self, kind: SubsystemKind) -> Option<Arc<dyn Subsystem>> {
        self.inner.remove(&kind)
    }

    pub fn contains(&self, kind: SubsystemKind) -> bool {
        self.inner.contains_key(&kind)
    }

    pub fn handle(&self, kind: SubsystemKind) -> Option<Arc<dyn Subsystem>> {
        self.inner.get(&kind).cloned()
    }

    /// Typed lookup, e.g. `handles.get::<Database>(SubsystemKind::Database)`.
    pub fn get<T: Subsystem>(&self, kind: SubsystemKind) -> Option<Arc<T>> {
        let handle = self.inner.get(&kind)?.clone();
        handle.into_any().downcast::<T>().ok()
    }

    pub fn kinds(&self) -> Vec<SubsystemKind> {
        self.inner.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubsystemKind, &Arc<dyn Subsystem>)> {
        self.inner.iter().map(|(kind, handle)| (*kind, handle))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Handles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.keys()).finish()
    }
}
