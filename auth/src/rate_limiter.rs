//! Sliding-window rate limiting.
//!
//! A single in-process limiter keyed by an arbitrary string (connection id,
//! user id, IP — the caller decides). No persistent or cross-instance
//! implementation is provided: every caller of this trait owns exactly one
//! process's worth of state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{AuthError, Result};

/// A rate limiter keyed by an arbitrary string identifier.
///
/// Implementations track a sliding window of timestamps per key and reject
/// once the count within the window exceeds `limit`.
pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `key` and return whether it is allowed under
    /// `limit` attempts per `window`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TooManyAttempts` if the limit has been exceeded,
    /// `AuthError::InternalError` if the limiter's internal state could not
    /// be accessed (e.g. a poisoned lock).
    fn check_and_record(&self, key: &str, limit: u32, window: Duration) -> Result<()>;

    /// Reset all recorded attempts for `key`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InternalError` if the limiter's internal state
    /// could not be accessed.
    fn reset(&self, key: &str) -> Result<()>;
}

fn current_timestamp_ms() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .map_err(|e| AuthError::InternalError(e.to_string()))
}

/// An in-memory sliding-window rate limiter.
///
/// Stores a `Vec<u64>` of millisecond timestamps per key. Entries older than
/// the window are pruned on every call, so the map does not grow unbounded
/// for keys that are checked periodically.
#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    attempts: Mutex<HashMap<String, Vec<u64>>>,
}

impl InMemoryRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn cleanup_old_entries(timestamps: &mut Vec<u64>, window_start: u64) {
        timestamps.retain(|&ts| ts >= window_start);
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_and_record(&self, key: &str, limit: u32, window: Duration) -> Result<()> {
        let now = current_timestamp_ms()?;
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let window_start = now.saturating_sub(window_ms);

        let mut attempts = self
            .attempts
            .lock()
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        let timestamps = attempts.entry(key.to_string()).or_default();
        Self::cleanup_old_entries(timestamps, window_start);

        if timestamps.len() >= limit as usize {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after_ms = (oldest + window_ms).saturating_sub(now);
            return Err(AuthError::TooManyAttempts {
                retry_after: Duration::from_millis(retry_after_ms),
            });
        }

        timestamps.push(now);
        Ok(())
    }

    fn reset(&self, key: &str) -> Result<()> {
        let mut attempts = self
            .attempts
            .lock()
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        attempts.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_attempts_under_limit() {
        let limiter = InMemoryRateLimiter::new();
        for _ in 0..5 {
            limiter
                .check_and_record("conn-1", 5, Duration::from_secs(1))
                .expect("should allow attempts under the limit");
        }
    }

    #[test]
    fn rejects_attempts_over_limit() {
        let limiter = InMemoryRateLimiter::new();
        for _ in 0..5 {
            limiter
                .check_and_record("conn-1", 5, Duration::from_secs(1))
                .expect("should allow attempts under the limit");
        }

        let err = limiter
            .check_and_record("conn-1", 5, Duration::from_secs(1))
            .expect_err("sixth attempt should be rejected");
        assert!(matches!(err, AuthError::TooManyAttempts { .. }));
    }

    #[test]
    fn separate_keys_have_independent_windows() {
        let limiter = InMemoryRateLimiter::new();
        for _ in 0..5 {
            limiter
                .check_and_record("conn-1", 5, Duration::from_secs(1))
                .expect("should allow attempts under the limit");
        }

        limiter
            .check_and_record("conn-2", 5, Duration::from_secs(1))
            .expect("a different key should have its own window");
    }

    #[test]
    fn reset_clears_recorded_attempts() {
        let limiter = InMemoryRateLimiter::new();
        for _ in 0..5 {
            limiter
                .check_and_record("conn-1", 5, Duration::from_secs(1))
                .expect("should allow attempts under the limit");
        }

        limiter.reset("conn-1").expect("reset should succeed");

        limiter
            .check_and_record("conn-1", 5, Duration::from_secs(1))
            .expect("window should be clear after reset");
    }
}
