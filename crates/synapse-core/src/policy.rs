//! Retry and convergence-poll policy.
//!
//! All attempt counts, backoff constants, and poll budgets are operational
//! configuration supplied by the embedder. The defaults below are starting
//! points, not requirements; nothing in the state machine depends on the
//! specific numbers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded retry with exponential backoff, applied to transient
/// infrastructure failures only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub backoff_base: Duration,
    /// Upper bound on any single delay.
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

/// Convergence polling: repeated observation of device operational state
/// under both an attempt bound and a wall-clock budget. This is waiting for
/// asynchronous convergence, not recovering from a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Delay before the second observation; doubles each poll.
    pub interval_base: Duration,
    /// Upper bound on any single delay.
    pub interval_cap: Duration,
    /// Total wall-clock budget for the poll.
    pub budget: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval_base: Duration::from_secs(2),
            interval_cap: Duration::from_secs(30),
            budget: Duration::from_secs(120),
        }
    }
}

/// Combined pipeline policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinePolicy {
    pub retry: RetryPolicy,
    pub convergence: PollPolicy,
}

impl PipelinePolicy {
    /// Zero-delay policy for tests: same attempt bounds, no sleeping.
    pub fn immediate() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::ZERO,
                backoff_cap: Duration::ZERO,
            },
            convergence: PollPolicy {
                max_attempts: 3,
                interval_base: Duration::ZERO,
                interval_cap: Duration::ZERO,
                budget: Duration::from_secs(60),
            },
        }
    }
}

/// Exponential backoff delay before the given attempt (2-indexed: the first
/// attempt has no delay).
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    if attempt <= 1 || base.is_zero() {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(2).min(16);
    let delay = base.saturating_mul(2u32.saturating_pow(exp));
    delay.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_no_delay() {
        let p = RetryPolicy::default();
        assert_eq!(backoff_delay(p.backoff_base, p.backoff_cap, 1), Duration::ZERO);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, cap, 4), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let base = Duration::from_secs(8);
        let cap = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, cap, 5), cap);
    }

    #[test]
    fn zero_base_never_sleeps() {
        assert_eq!(
            backoff_delay(Duration::ZERO, Duration::ZERO, 7),
            Duration::ZERO
        );
    }
}
