//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, pool sizes > 0)
//! - Check that URLs, bind addresses and log directives parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;
use url::Url;

use crate::config::schema::{AppConfig, RetryConfig};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. "server.bind_address").
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let lifecycle = &config.lifecycle;
    positive(&mut errors, "lifecycle.shutdown_timeout_ms", lifecycle.shutdown_timeout_ms);
    positive(&mut errors, "lifecycle.close_timeout_ms", lifecycle.close_timeout_ms);
    positive(
        &mut errors,
        "lifecycle.health_probe_timeout_ms",
        lifecycle.health_probe_timeout_ms,
    );

    if config.observability.metrics_enabled {
        socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if let Some(logger) = &config.logger {
        if let Err(e) = EnvFilter::try_new(&logger.level) {
            errors.push(ValidationError::new("logger.level", e.to_string()));
        }
    }

    if let Some(database) = &config.database {
        url(&mut errors, "database.url", &database.url, &["postgres", "postgresql"]);
        if database.max_connections == 0 {
            errors.push(ValidationError::new("database.max_connections", "must be greater than 0"));
        }
        positive(&mut errors, "database.connect_timeout_secs", database.connect_timeout_secs);
        retry(&mut errors, "database.retry", &database.retry);
    }

    if let Some(cache) = &config.cache {
        url(&mut errors, "cache.url", &cache.url, &["redis", "rediss"]);
        positive(&mut errors, "cache.default_ttl_secs", cache.default_ttl_secs);
        positive(&mut errors, "cache.connect_timeout_secs", cache.connect_timeout_secs);
        retry(&mut errors, "cache.retry", &cache.retry);
    }

    if let Some(broker) = &config.broker {
        url(&mut errors, "broker.url", &broker.url, &["redis", "rediss"]);
        positive(&mut errors, "broker.connect_timeout_secs", broker.connect_timeout_secs);
        retry(&mut errors, "broker.retry", &broker.retry);
    }

    if let Some(identity) = &config.identity {
        url(&mut errors, "identity.issuer_url", &identity.issuer_url, &["http", "https"]);
        if identity.client_id.is_empty() {
            errors.push(ValidationError::new("identity.client_id", "must not be empty"));
        }
        positive(&mut errors, "identity.timeout_secs", identity.timeout_secs);
    }

    if let Some(http_client) = &config.http_client {
        positive(&mut errors, "http_client.timeout_secs", http_client.timeout_secs);
        positive(
            &mut errors,
            "http_client.connect_timeout_secs",
            http_client.connect_timeout_secs,
        );
        if let Some(health_url) = &http_client.health_url {
            url(&mut errors, "http_client.health_url", health_url, &["http", "https"]);
        }
    }

    if let Some(server) = &config.server {
        socket_addr(&mut errors, "server.bind_address", &server.bind_address);
        positive(&mut errors, "server.request_timeout_secs", server.request_timeout_secs);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    }
}

fn socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{value}' is not a valid socket address"),
        ));
    }
}

fn url(errors: &mut Vec<ValidationError>, field: &str, value: &str, schemes: &[&str]) {
    match Url::parse(value) {
        Ok(parsed) if schemes.contains(&parsed.scheme()) => {}
        Ok(parsed) => errors.push(ValidationError::new(
            field,
            format!(
                "unsupported scheme '{}' (expected one of {})",
                parsed.scheme(),
                schemes.join(", ")
            ),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
    }
}

fn retry(errors: &mut Vec<ValidationError>, field: &str, retry: &RetryConfig) {
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new(
            format!("{field}.max_attempts"),
            "must be at least 1",
        ));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            format!("{field}.base_delay_ms"),
            "must not exceed max_delay_ms",
        ));
    }
}
