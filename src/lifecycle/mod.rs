//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Init (bootstrap.rs → startup.rs):
//!     before-init hooks → Logger → other subsystems concurrently → attach → after-init hooks
//!
//! Start (bootstrap.rs):
//!     before-start hooks → start each subsystem (server last) → after-start hooks
//!     → wait for: ctx cancelled | Bootstrap::shutdown | SIGINT/SIGTERM | subsystem fault
//!
//! Stop (shutdown.rs):
//!     before-stop hooks → drain + close server → close infrastructure → close logger
//!     → after-stop hooks
//! ```
//!
//! # Design Decisions
//! - Phase check-and-set under a short lock, never held across construction or hooks
//! - Fail-fast construction: first error cancels the shared scope
//! - Shutdown has a deadline; individual closes have their own budget
//! - A stopped bootstrap is terminal

pub mod bootstrap;
pub mod context;
pub mod hooks;
pub mod phase;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use bootstrap::{Bootstrap, BootstrapBuilder};
pub use context::{Context, ContextError};
pub use hooks::{HookContext, HookPhase, HookResult};
pub use phase::Phase;
pub use shutdown::{ShutdownFailure, ShutdownReport, ShutdownStep};
