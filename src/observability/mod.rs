//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator and subsystems produce:
//!     → logging.rs (dispatch built from LoggerConfig)
//!     → metrics.rs (phase durations, construct latency, health gauges)
//!
//! Consumers:
//!     → stdout (pretty/compact/JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - The logger is itself a subsystem so that it is the first thing up and the last thing down
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
