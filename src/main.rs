//! `bootstrapd`: runs the configured subsystems until SIGINT/SIGTERM.
//!
//! ```text
//! bootstrapd [--config <path>]
//!     → load + validate config (logger + server when no file is given)
//!     → Prometheus exporter (if enabled)
//!     → Bootstrap::from_config
//!     → after-init: mount GET /health on the server
//!     → run: init → start → wait → stop
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use clap::Parser;

use app_bootstrap::config::{load_config, AppConfig};
use app_bootstrap::observability::metrics;
use app_bootstrap::subsystem::Server;
use app_bootstrap::{Bootstrap, Context, SubsystemKind};

#[derive(Parser)]
#[command(name = "bootstrapd")]
#[command(about = "Bring up the configured subsystems and keep them running", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("bootstrapd: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::minimal(),
    };

    // No subscriber exists until the logger subsystem is built, so report on stderr.
    let metrics_addr = if config.observability.metrics_enabled {
        match metrics::init_metrics(&config.observability.metrics_address) {
            Ok(addr) => Some(addr),
            Err(e) => {
                eprintln!("bootstrapd: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let bootstrap = Arc::new(Bootstrap::from_config(&config));

    let weak = Arc::downgrade(&bootstrap);
    bootstrap.after_init(move |hctx| {
        let weak = weak.clone();
        async move {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "bootstrapd initialized");
            if let Some(addr) = metrics_addr {
                tracing::info!(address = %addr, "Metrics exporter listening");
            }
            if let Some(server) = hctx.handles().get::<Server>(SubsystemKind::Server) {
                server.merge(Router::new().route("/health", get(health)).with_state(weak));
                tracing::info!(address = %server.local_addr(), "Health endpoint mounted");
            }
            Ok(())
        }
    });

    match bootstrap.run(&Context::background()).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "bootstrapd failed");
            eprintln!("bootstrapd: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn health(State(bootstrap): State<std::sync::Weak<Bootstrap>>) -> impl IntoResponse {
    let Some(bootstrap) = bootstrap.upgrade() else {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "healthy": false })));
    };
    let report = bootstrap.health(&Context::background()).await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report.to_json()))
}
