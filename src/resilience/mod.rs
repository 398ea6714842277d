//! Resilience helpers for subsystem construction.
//!
//! # Data Flow
//! ```text
//! construct(ctx):
//!     → retries.rs (attempt connect, bounded by ctx)
//!     → On failure: backoff.rs (exponential delay + jitter)
//!     → retry until max_attempts or ctx ends
//! ```
//!
//! # Design Decisions
//! - Only the first connection is retried; steady-state retry policy belongs to the client
//! - Timeouts are non-negotiable; every attempt runs under the caller's context

pub mod backoff;
pub mod retries;

pub use retries::retry_connect;
