//! HTTP server subsystem.
//!
//! # Responsibilities
//! - Bind the listener during Init so address conflicts fail construction
//! - Collect routes merged in by hooks before Start
//! - Serve in a background task; a serve error is reported as a fault
//! - Drain in-flight requests on Stop, bounded by the stop context

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::subsystem::{Constructor, FaultSender, Subsystem};

pub struct Server {
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    router: Mutex<Option<Router>>,
    request_timeout: Duration,
    release_mode: bool,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    abort: Mutex<Option<AbortHandle>>,
    closed: AtomicBool,
}

impl Server {
    pub async fn bind(ctx: &Context, config: &ServerConfig) -> Result<Self, SubsystemError> {
        let listener = ctx.run(TcpListener::bind(&config.bind_address)).await??;
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "HTTP listener bound");

        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            router: Mutex::new(Some(Router::new())),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            release_mode: config.release_mode,
            token: CancellationToken::new(),
            task: Mutex::new(None),
            abort: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Add routes. Only effective before Start.
    pub fn merge(&self, routes: Router) {
        let mut guard = self.router.lock();
        match guard.take() {
            Some(current) => *guard = Some(current.merge(routes)),
            None => tracing::warn!("Server already started, routes ignored"),
        }
    }

    /// Build the served router with its middleware layers.
    #[allow(deprecated)]
    fn build_app(&self, routes: Router) -> Router {
        let app = routes.layer(TimeoutLayer::new(self.request_timeout));
        if self.release_mode {
            app
        } else {
            app.layer(TraceLayer::new_for_http())
        }
    }
}

#[async_trait]
impl Subsystem for Server {
    async fn start(&self, _ctx: &Context, faults: FaultSender) -> Result<(), SubsystemError> {
        let listener = self.listener.lock().take();
        let routes = self.router.lock().take();
        let (listener, routes) = match (listener, routes) {
            (Some(listener), Some(routes)) => (listener, routes),
            _ => return Err(SubsystemError::Closed),
        };

        let app = self.build_app(routes);
        let token = self.token.clone();
        let addr = self.local_addr;

        let handle = tokio::spawn(async move {
            tracing::info!(address = %addr, "HTTP server starting");
            let shutdown = token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;

            match result {
                Err(e) => {
                    tracing::error!(error = %e, "HTTP server failed");
                    faults.report(SubsystemError::Io(e));
                }
                Ok(()) if !token.is_cancelled() => {
                    faults.report(SubsystemError::Unavailable("server exited unexpectedly".into()));
                }
                Ok(()) => tracing::info!("HTTP server stopped"),
            }
        });

        *self.abort.lock() = Some(handle.abort_handle());
        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn drain(&self, ctx: &Context) -> Result<(), SubsystemError> {
        self.token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            tracing::info!("Draining HTTP connections");
            ctx.run(task)
                .await?
                .map_err(|e| SubsystemError::Panicked(e.to_string()))?;
        }
        Ok(())
    }

    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubsystemError::Closed);
        }
        if let Some(abort) = self.abort.lock().as_ref() {
            if abort.is_finished() {
                return Err(SubsystemError::Unavailable("server task exited".into()));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.token.cancel();
        if let Some(abort) = self.abort.lock().take() {
            abort.abort();
        }
        self.listener.lock().take();
        tracing::info!(address = %self.local_addr, "HTTP server closed");
        Ok(())
    }
}

#[async_trait]
impl Constructor for ServerConfig {
    async fn construct(&self, ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(Server::bind(ctx, self).await?))
    }
}
