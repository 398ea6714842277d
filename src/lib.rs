//! Application lifecycle orchestration.
//!
//! A [`Bootstrap`] constructs a fixed set of infrastructure subsystems
//! (logger, database, cache, broker, identity client, HTTP client, scheduler,
//! HTTP server), runs user hooks around each phase boundary and tears
//! everything down in a bounded, ordered sequence.

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod subsystem;

pub use config::AppConfig;
pub use error::{BootstrapError, BoxError, SubsystemError};
pub use health::HealthReport;
pub use lifecycle::{
    Bootstrap, BootstrapBuilder, Context, HookContext, HookPhase, Phase, ShutdownFailure,
    ShutdownReport, ShutdownStep,
};
pub use subsystem::{constructor_fn, Constructor, Handles, Subsystem, SubsystemKind};
