//! Retry scheduling for transient registration failures.
//!
//! Exponential backoff with a capped maximum delay and a maximum attempt
//! count. The policy only computes delays and limits; the registration
//! client owns the timer and the fresh-snapshot rule for each attempt.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::constants;

/// Backoff multiplier per attempt.
const BACKOFF_FACTOR: f64 = 2.0;

/// Exponential-backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: constants::RETRY_BASE_DELAY,
            max_delay: constants::RETRY_MAX_DELAY,
            max_attempts: constants::RETRY_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Build a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Policy with explicit values, mostly for tests.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Maximum attempts, the initial try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow the given (1-based) attempt.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff delay to wait after the given (1-based) failed attempt.
    ///
    /// Delay doubles per attempt, capped at the configured maximum.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let backoff = base_ms * BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
        let capped = backoff.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
