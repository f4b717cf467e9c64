//! Error taxonomy for upstream fetches.
//!
//! `FetchError` is `Clone` because a coalesced call hands the same result to
//! every caller that joined it.

use thiserror::Error;

/// Failure of a single upstream metrics call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport-level failure (connection refused, reset, DNS).
    #[error("request to {endpoint} failed: {message}")]
    Network { endpoint: String, message: String },

    /// Backend answered with a non-2xx status.
    #[error("upstream returned status {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// Attempt exceeded the per-call timeout and was aborted.
    #[error("request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Body could not be decoded into the expected shape.
    #[error("malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },

    /// Caller-initiated abort.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Transient failures are retried; a broken contract or an explicit
    /// cancellation never is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network { .. } | FetchError::Status { .. } | FetchError::Timeout { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Invalid resilience settings.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
