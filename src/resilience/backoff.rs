//! Delay between connection attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay to wait after `failures` failed attempts under `policy`.
///
/// Doubles from `base_delay_ms`, caps at `max_delay_ms`, then adds up to a
/// tenth of the capped delay as jitter. No failures means no delay.
pub fn retry_delay(policy: &RetryConfig, failures: u32) -> Duration {
    let Some(doublings) = failures.checked_sub(1) else {
        return Duration::ZERO;
    };

    let factor = 1u64.checked_shl(doublings).unwrap_or(u64::MAX);
    let capped = policy
        .base_delay_ms
        .saturating_mul(factor)
        .min(policy.max_delay_ms);

    let spread = capped / 10;
    let jitter = match spread {
        0 => 0,
        spread => rand::thread_rng().gen_range(0..spread),
    };
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_delay_ms: u64, max_delay_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            base_delay_ms,
            max_delay_ms,
        }
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let p = policy(100, 1000);

        let first = retry_delay(&p, 1).as_millis();
        assert!((100..110).contains(&first));

        let second = retry_delay(&p, 2).as_millis();
        assert!((200..220).contains(&second));

        let capped = retry_delay(&p, 10).as_millis();
        assert!((1000..1100).contains(&capped));
    }

    #[test]
    fn test_huge_failure_count_stays_capped() {
        let capped = retry_delay(&policy(250, 4000), 200).as_millis();
        assert!((4000..4400).contains(&capped));
    }

    #[test]
    fn test_no_failures_no_delay() {
        assert_eq!(retry_delay(&policy(100, 1000), 0), Duration::ZERO);
    }

    #[test]
    fn test_tiny_delays_skip_jitter() {
        assert_eq!(retry_delay(&policy(1, 5), 1), Duration::from_millis(1));
    }
}
