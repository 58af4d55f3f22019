//! Application-wide constants for pushsync.
//!
//! This module centralizes timeouts and retry tuning so the values are
//! documented and discoverable in one place. Retry values are defaults;
//! they can be overridden through [`crate::config::RuntimeConfig`].

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for registration API calls.
///
/// Applies to each individual request to the registration endpoint.
/// 10 seconds is sufficient for a small JSON payload while preventing
/// indefinite hangs on network issues.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Retry
// ============================================================================

/// Base delay before the first retry of a failed registration request.
///
/// Subsequent retries double this delay per attempt, capped at
/// [`RETRY_MAX_DELAY`].
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the backoff delay between retries.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

/// Maximum number of attempts (initial try included) before a transient
/// failure is surfaced to observers as retries-exhausted.
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Sync queue
// ============================================================================

/// Capacity of the sync-request queue feeding the reconciliation task.
///
/// Requests beyond this depth coalesce with the ones already queued, so the
/// exact value only bounds memory, not behavior. Kept small on purpose.
pub const SYNC_QUEUE_DEPTH: usize = 4;

// ============================================================================
// Defaults
// ============================================================================

/// Time zone identifier used when the host application never set one.
pub const DEFAULT_TIME_ZONE: &str = "UTC";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_values_are_reasonable() {
        // HTTP timeout should be between 5-60 seconds
        assert!(HTTP_REQUEST_TIMEOUT >= Duration::from_secs(5));
        assert!(HTTP_REQUEST_TIMEOUT <= Duration::from_secs(60));
    }

    #[test]
    fn test_retry_delays_ordering() {
        assert!(RETRY_BASE_DELAY < RETRY_MAX_DELAY);
        assert!(RETRY_MAX_ATTEMPTS >= 1);
    }

    #[test]
    fn test_sync_queue_depth_is_positive() {
        assert!(SYNC_QUEUE_DEPTH >= 1);
    }
}
