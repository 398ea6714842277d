//! Retry logic for establishing connections during construction.
//!
//! # Design Decisions
//! - Every attempt and every backoff sleep is bounded by the construction context
//! - Jittered backoff prevents a thundering herd when many replicas boot at once
//! - The last error is returned when attempts run out

use std::future::Future;

use crate::config::RetryConfig;
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::resilience::backoff::retry_delay;

/// Run `op` until it succeeds, attempts run out, or `ctx` ends.
pub async fn retry_connect<T, F, Fut>(
    ctx: &Context,
    policy: &RetryConfig,
    target: &str,
    mut op: F,
) -> Result<T, SubsystemError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SubsystemError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match ctx.run(op()).await? {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            tracing::warn!(target_name = target, attempts = attempt, error = %err, "Giving up connecting");
            return Err(err);
        }

        let delay = retry_delay(policy, attempt);
        tracing::info!(target_name = target, attempt, delay = ?delay, error = %err, "Connection attempt failed, retrying");
        ctx.run(tokio::time::sleep(delay)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_connect(&Context::background(), &fast_policy(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SubsystemError::Unavailable("not yet".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_connect(&Context::background(), &fast_policy(2), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SubsystemError::Unavailable("down".into())) }
            })
            .await;

        assert!(matches!(result, Err(SubsystemError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stops_when_context_ends() {
        let ctx = Context::background().with_timeout(Duration::from_millis(30));
        let policy = RetryConfig {
            max_attempts: 100,
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
        };
        let result: Result<(), _> = retry_connect(&ctx, &policy, "test", || async {
            Err(SubsystemError::Unavailable("down".into()))
        })
        .await;

        assert!(matches!(result, Err(SubsystemError::DeadlineExceeded)));
    }
}
