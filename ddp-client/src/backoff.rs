//! Exponential backoff for reconnection scheduling.
//!
//! A pure timer policy with no protocol knowledge. Each retry computes
//! `next = min(current * multiplier, max)` and waits for the *updated*
//! value, so the first retry already reflects one multiplication from the
//! base. A successful reconnect calls [`Backoff::reset`].

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            current: base,
        }
    }

    /// Advance the policy by one close event and return the delay to wait
    /// before the next attempt.
    pub fn next_interval(&mut self) -> Duration {
        let next = self.current.mul_f64(self.multiplier).min(self.max);
        self.current = next;
        next
    }

    /// Return to the base interval (called once a reconnect handshake
    /// completes).
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        // 2s doubling up to a 30s ceiling.
        Self::new(Duration::from_secs(2), Duration::from_secs(30), 2.0)
    }
}
