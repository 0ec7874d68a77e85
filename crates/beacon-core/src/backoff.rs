//! Exponential backoff with full jitter, shared by every component that
//! retries against the coordination service (WebSocket reconnection,
//! versioned-update retries).
//!
//! Follows the AWS "Full Jitter" strategy: `delay = random(0, min(cap, base
//! * 2^attempt))`.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff calculator with full jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff calculator with explicit bounds.
    #[must_use]
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Create a new backoff calculator from a [`BackoffConfig`].
    #[must_use]
    pub fn from_config(config: BackoffConfig) -> Self {
        Self::new(config.base_ms, config.max_ms)
    }

    /// Compute the next delay with full jitter and advance the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_ms);
        let jittered = if capped == 0 {
            0
        } else {
            fastrand::u64(0..=capped)
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered)
    }

    /// Reset the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Current attempt count.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_bounded_by_base() {
        let mut b = Backoff::new(1000, 60_000);
        for _ in 0..100 {
            b.attempt = 0;
            let delay = b.next_delay();
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn delay_capped_at_max() {
        let mut b = Backoff::new(1000, 5000);
        for _ in 0..20 {
            let delay = b.next_delay();
            assert!(delay <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn reset_resets_attempt() {
        let mut b = Backoff::new(1000, 60_000);
        for _ in 0..5 {
            let _ = b.next_delay();
        }
        assert_eq!(b.attempt(), 5);
        b.reset();
        assert_eq!(b.attempt(), 0);
    }

    #[test]
    fn zero_base_produces_zero_delay() {
        let mut b = Backoff::new(0, 0);
        for _ in 0..10 {
            let delay = b.next_delay();
            assert_eq!(delay, Duration::ZERO);
        }
    }

    #[test]
    fn attempt_saturates() {
        let mut b = Backoff::new(1000, 60_000);
        b.attempt = u32::MAX;
        let delay = b.next_delay();
        assert!(delay <= Duration::from_millis(60_000));
        assert_eq!(b.attempt(), u32::MAX);
    }

    #[test]
    fn from_config_uses_config_bounds() {
        let b = Backoff::from_config(BackoffConfig {
            base_ms: 10,
            max_ms: 20,
        });
        assert_eq!(b.base_ms, 10);
        assert_eq!(b.max_ms, 20);
    }
}
