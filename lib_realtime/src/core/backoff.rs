//! # Reconnect Policy
//!
//! Exponential backoff with ratio 1.5 and no jitter. The k-th attempt
//! (k >= 1) waits `base * 1.5^(k-1)`. There is no cap on the delay itself;
//! the attempt ceiling is what bounds reconnection.

use std::time::Duration;

/// Growth factor between consecutive reconnect delays.
pub const BACKOFF_RATIO: f64 = 1.5;

/// Attempt counter plus the delay formula.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    /// A fresh policy with `attempts == 0`.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base.mul_f64(BACKOFF_RATIO.powi(exponent))
    }

    /// Counts one more attempt and returns its number and delay, or `None`
    /// once `max_attempts` attempts have already been scheduled.
    pub fn schedule_next(&mut self) -> Option<(u32, Duration)> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.delay_for(self.attempts)))
    }

    /// Back to zero; called on every successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
