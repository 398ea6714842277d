//! Health aggregation across live subsystems.
//!
//! # Data Flow
//! ```text
//! Handles snapshot
//!     → one probe per handle, concurrently, each in its own timed scope
//!     → HealthReport { kind → Ok | Err }
//!     → metrics gauge per subsystem
//!     → JSON for the /health endpoint
//! ```
//!
//! # Design Decisions
//! - A slow probe only costs its own timeout; it never delays the others
//! - A probe that overruns is reported as `Timeout`, not as a missing entry

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Map, Value};

use crate::error::SubsystemError;
use crate::lifecycle::context::{Context, ContextError};
use crate::observability::metrics;
use crate::subsystem::{Handles, SubsystemKind};

/// Per-subsystem probe outcomes.
#[derive(Debug, Default)]
pub struct HealthReport {
    results: BTreeMap<SubsystemKind, Result<(), SubsystemError>>,
}

impl HealthReport {
    /// True when every probed subsystem is healthy (vacuously true when empty).
    pub fn is_healthy(&self) -> bool {
        self.results.values().all(Result::is_ok)
    }

    pub fn get(&self, kind: SubsystemKind) -> Option<&Result<(), SubsystemError>> {
        self.results.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubsystemKind, &Result<(), SubsystemError>)> {
        self.results.iter().map(|(kind, result)| (*kind, result))
    }

    pub fn unhealthy(&self) -> Vec<SubsystemKind> {
        self.iter()
            .filter(|(_, result)| result.is_err())
            .map(|(kind, _)| kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut subsystems = Map::new();
        for (kind, result) in self.iter() {
            let entry = match result {
                Ok(()) => json!({ "status": "ok" }),
                Err(e) => json!({ "status": "error", "error": e.to_string() }),
            };
            subsystems.insert(kind.as_str().to_string(), entry);
        }
        json!({
            "healthy": self.is_healthy(),
            "subsystems": subsystems,
        })
    }
}

impl FromIterator<(SubsystemKind, Result<(), SubsystemError>)> for HealthReport {
    fn from_iter<I: IntoIterator<Item = (SubsystemKind, Result<(), SubsystemError>)>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

/// Probe every handle concurrently, each bounded by `probe_timeout`.
pub async fn probe_all(handles: &Handles, ctx: &Context, probe_timeout: Duration) -> HealthReport {
    let probes = handles.iter().map(|(kind, handle)| {
        let probe_ctx = ctx.with_timeout(probe_timeout);
        async move {
            let outcome = match probe_ctx.run(handle.health_check(&probe_ctx)).await {
                Ok(result) => result,
                Err(ContextError::DeadlineExceeded) => Err(SubsystemError::Timeout(probe_timeout)),
                Err(ContextError::Cancelled) => Err(SubsystemError::Cancelled),
            };
            if let Err(e) = &outcome {
                tracing::warn!(kind = %kind, error = %e, "Health probe failed");
            }
            metrics::record_health(kind, outcome.is_ok());
            (kind, outcome)
        }
    });

    join_all(probes).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json() {
        let report: HealthReport = vec![
            (SubsystemKind::Database, Ok(())),
            (SubsystemKind::Cache, Err(SubsystemError::Closed)),
        ]
        .into_iter()
        .collect();

        assert!(!report.is_healthy());
        assert_eq!(report.unhealthy(), vec![SubsystemKind::Cache]);

        let body = report.to_json();
        assert_eq!(body["healthy"], false);
        assert_eq!(body["subsystems"]["database"]["status"], "ok");
        assert_eq!(body["subsystems"]["cache"]["status"], "error");
        assert_eq!(body["subsystems"]["cache"]["error"], "handle is closed");
    }

    #[test]
    fn test_empty_report_is_healthy() {
        let report = HealthReport::default();
        assert!(report.is_healthy());
        assert!(report.is_empty());
    }
}
