//! Error types for pushsync.
//!
//! Two layers exist on purpose. [`Error`] covers failures reported
//! synchronously to callers (missing token, persistence problems, use after
//! shutdown). [`SyncFailure`] carries the terminal outcome of a
//! registration cycle and travels exclusively through observer callbacks —
//! intermediate retries never produce one.

use thiserror::Error;

/// Library-level error type for pushsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No device token has been received yet, so there is nothing to
    /// register or unregister. Reported to the caller of a sync request,
    /// never to observers.
    #[error("device token not available yet")]
    NotReady,

    /// The manager has been shut down; no further syncs are accepted.
    #[error("push manager is shut down")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pushsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failure of a registration cycle, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    /// The registration service answered with a 5xx status. Retryable.
    #[error("server error (HTTP {status}): {body}")]
    ServerError {
        /// HTTP status code in the 500 range.
        status: u16,
        /// Response body, if any.
        body: String,
    },

    /// The registration service rejected the request with a non-5xx,
    /// non-2xx status. Never retried.
    #[error("client error (HTTP {status}): {body}")]
    ClientError {
        /// HTTP status code outside the 200 and 500 ranges.
        status: u16,
        /// Response body, if any.
        body: String,
    },

    /// The request never produced an HTTP response (timeout, connection
    /// refused, DNS failure). Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The retry policy ran out of attempts on a retryable failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts performed, the initial one included.
        attempts: u32,
        /// The failure observed on the final attempt.
        last: Box<SyncFailure>,
    },
}

impl SyncFailure {
    /// Whether the retry policy may schedule another attempt for this
    /// failure. Only server-side (5xx) and transport-level failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError { .. } | Self::Transport(_))
    }
}
