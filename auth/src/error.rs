//! Error types for rate limiting operations.

use thiserror::Error;

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error taxonomy for the rate limiter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Too many attempts within the current window.
    #[error("Too many attempts, please retry after {retry_after:?}")]
    TooManyAttempts {
        /// Duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    /// Internal error (clock failure, poisoned lock, etc).
    #[error("Internal error: {0}")]
    InternalError(String),
}
