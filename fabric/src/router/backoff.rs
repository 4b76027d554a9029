//! Reconnect backoff for the cross-instance pub/sub subscriber (`spec.md`
//! §4.4: "exponential backoff (base 500 ms, cap 30 s, jitter 20%)").
//!
//! Deliberately narrower than [`composable_rust_runtime`]'s `RetryPolicy`,
//! which hard-codes a 0.5–1.0 multiplicative jitter band; this needs a
//! literal base/cap/percentage to match the contract above exactly.

use rand::Rng;
use std::time::Duration;

const BASE: Duration = Duration::from_millis(500);
const CAP: Duration = Duration::from_secs(30);
const JITTER_FRACTION: f64 = 0.2;

/// Stateful exponential-backoff delay generator.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempt: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self { attempt: 0 }
    }
}

impl ReconnectBackoff {
    /// A fresh backoff starting at the base delay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The next delay to wait before reconnecting, with `attempt` advanced.
    /// `2^attempt * base`, capped, with up to 20% jitter applied in either
    /// direction.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(16); // guard against overflow in shl
        self.attempt += 1;

        let scaled = BASE
            .checked_mul(1u32 << exponent)
            .unwrap_or(CAP)
            .min(CAP);

        jitter(scaled)
    }

    /// Reset to the base delay, e.g. after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn jitter(base: Duration) -> Duration {
    let span = base.as_secs_f64() * JITTER_FRACTION;
    let delta = rand::thread_rng().gen_range(-span..=span);
    let jittered = (base.as_secs_f64() + delta).max(0.0);
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_near_base() {
        let mut backoff = ReconnectBackoff::new();
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(400));
        assert!(delay <= Duration::from_millis(600));
    }

    #[test]
    fn delays_grow_then_cap() {
        let mut backoff = ReconnectBackoff::new();
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay <= CAP + Duration::from_secs(6)); // cap plus jitter headroom
        }
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = ReconnectBackoff::new();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(600));
    }
}
