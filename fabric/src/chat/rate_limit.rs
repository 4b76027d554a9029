//! Per-connection chat rate limiting (`spec.md` §4.7).
//!
//! A chat room is owned by exactly one process, so this delegates straight
//! to [`composable_rust_auth`]'s sliding-window limiter rather than
//! reimplementing one — no Redis round trip is needed, and the limiter
//! already only tracks the keys it is asked about.

use composable_rust_auth::rate_limiter::{InMemoryRateLimiter, RateLimiter};
use std::time::Duration;

/// Caps inbound `CHAT` frames to `limit_per_s` per connection.
pub struct SlidingWindowLimiter {
    inner: InMemoryRateLimiter,
    limit_per_s: u32,
}

impl SlidingWindowLimiter {
    /// A limiter allowing `limit_per_s` messages per second per key.
    #[must_use]
    pub fn new(limit_per_s: u32) -> Self {
        Self {
            inner: InMemoryRateLimiter::new(),
            limit_per_s,
        }
    }

    /// Record one inbound chat frame from `connection_id`. Returns `false`
    /// once the per-second limit is exceeded; the caller closes the
    /// connection with an `ERROR` frame on `false` (§4.7).
    pub fn check_message(&self, connection_id: &str) -> bool {
        self.inner
            .check_and_record(connection_id, self.limit_per_s, Duration::from_secs(1))
            .is_ok()
    }

    /// Drop a connection's recorded attempts once it disconnects, so the
    /// limiter's map does not grow unbounded across a room's lifetime.
    pub fn forget(&self, connection_id: &str) {
        let _ = self.inner.reset(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_configured_rate() {
        let limiter = SlidingWindowLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.check_message("c1"));
        }
        assert!(!limiter.check_message("c1"));
    }

    #[test]
    fn forget_clears_a_connections_window() {
        let limiter = SlidingWindowLimiter::new(1);
        assert!(limiter.check_message("c1"));
        assert!(!limiter.check_message("c1"));
        limiter.forget("c1");
        assert!(limiter.check_message("c1"));
    }
}
