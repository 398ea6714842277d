//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → Bootstrap::from_config (one constructor per present table)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once handed to the Bootstrap
//! - All fields have defaults to allow minimal configs
//! - A missing subsystem table means the subsystem is not used
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, BrokerConfig, CacheConfig, DatabaseConfig, HttpClientConfig, IdentityConfig,
    LifecycleConfig, LogFormat, LoggerConfig, ObservabilityConfig, RetryConfig, SchedulerConfig,
    ServerConfig,
};
