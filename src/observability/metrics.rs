//! Lifecycle metrics and exposition.
//!
//! # Metrics
//! - `bootstrap_phase_duration_seconds` (histogram): time spent in init/start/stop, by phase
//! - `bootstrap_subsystem_construct_seconds` (histogram): construction latency, by subsystem
//! - `bootstrap_subsystem_health` (gauge): 1=healthy, 0=unhealthy, by subsystem
//! - `bootstrap_shutdown_failures_total` (counter): failed shutdown steps, by step
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed recorder it is a no-op
//! - The Prometheus exporter is installed by the binary, never by the library

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::subsystem::SubsystemKind;

pub fn record_phase(phase: &'static str, elapsed: Duration) {
    metrics::histogram!("bootstrap_phase_duration_seconds", "phase" => phase)
        .record(elapsed.as_secs_f64());
}

pub fn record_construct(kind: SubsystemKind, elapsed: Duration) {
    metrics::histogram!("bootstrap_subsystem_construct_seconds", "subsystem" => kind.as_str())
        .record(elapsed.as_secs_f64());
}

pub fn record_health(kind: SubsystemKind, healthy: bool) {
    metrics::gauge!("bootstrap_subsystem_health", "subsystem" => kind.as_str())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_shutdown_failure(step: String) {
    metrics::counter!("bootstrap_shutdown_failures_total", "step" => step).increment(1);
}

/// Error type for exporter setup.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid metrics address '{0}'")]
    Address(String),

    #[error("failed to install metrics exporter on {addr}: {source}")]
    Install {
        addr: SocketAddr,
        #[source]
        source: BuildError,
    },
}

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Runs before any subscriber exists, so failures are returned rather than logged.
pub fn init_metrics(address: &str) -> Result<SocketAddr, MetricsError> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|_| MetricsError::Address(address.to_string()))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|source| MetricsError::Install { addr, source })?;
    Ok(addr)
}
