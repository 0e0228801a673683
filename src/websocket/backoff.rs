//! Reconnect backoff with exponential growth and random jitter.
//!
//! Delay for attempt `n` (starting at 0) is
//! `base * 2^min(n, max_doublings)` plus a uniform random extra in
//! `[0, jitter * that delay]`. Both steps saturate at [`Duration::MAX`].

use std::time::Duration;

use rand::Rng;

/// Tuning for [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    /// Number of doublings after which the delay stops growing.
    pub max_doublings: u32,
    /// Upper bound of the random extra, as a fraction of the delay.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_doublings: 5,
            jitter: 0.5,
        }
    }
}

/// Counts consecutive connection failures and turns them into delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config: BackoffConfig {
                // gen_range panics on an inverted or non-finite range
                jitter: config.jitter.max(0.0).min(1.0),
                ..config
            },
            attempt: 0,
        }
    }

    /// Delay before the next attempt, without jitter.
    pub fn base_delay(&self) -> Duration {
        let doublings = self.attempt.min(self.config.max_doublings);
        self.config
            .base
            .saturating_mul(2u32.saturating_pow(doublings))
    }

    /// Returns the delay for the current attempt and counts the failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base_delay();
        let jitter_range = delay.as_secs_f64() * self.config.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(0.0..=jitter_range)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);

        let jitter = Duration::try_from_secs_f64(jitter).unwrap_or(Duration::MAX);
        delay.saturating_add(jitter)
    }

    /// Forgets past failures. Called once a connection has stayed healthy.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
