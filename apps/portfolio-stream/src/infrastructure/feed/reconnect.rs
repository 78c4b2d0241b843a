//! Reconnection Backoff
//!
//! Exponential backoff with jitter for the price feed connection. The base
//! delay for attempt `n` is `initial × multiplier^(n-1)`, capped at
//! `max_delay`; jitter then spreads it by up to `±jitter_factor`.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::FeedSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the base delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Jitter as a fraction of the base delay (0.2 = ±20%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Build from feed settings.
    #[must_use]
    pub const fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Base delay for a 1-based attempt number, before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let millis = (self.initial_delay.as_millis() as f64 * factor).round();
        #[allow(clippy::cast_precision_loss)]
        let max_millis = self.max_delay.as_millis() as f64;

        if millis.is_finite() && millis < max_millis {
            to_duration(millis)
        } else {
            self.max_delay
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_duration(millis: f64) -> Duration {
    Duration::from_millis(millis.max(0.0) as u64)
}

/// Stateful backoff tracker for one connection loop.
///
/// # Example
///
/// ```rust
/// use portfolio_stream::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert!(policy.next_delay().is_some());
/// assert_eq!(policy.attempt_count(), 1);
///
/// // Connection succeeded
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no attempts made.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.jitter(self.config.base_delay(self.attempt_count)))
    }

    /// Forget past failures after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn jitter(&self, base: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || base.is_zero() {
            return base;
        }

        let spread: f64 = rand::rng().random_range(-factor..=factor);
        #[allow(clippy::cast_precision_loss)]
        let millis = (base.as_millis() as f64 * (1.0 + spread)).round();
        to_duration(millis.max(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_exponentially() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 0));

        let delays: Vec<_> = (0..4).map(|_| policy.next_delay().unwrap()).collect();

        assert_eq!(
            delays,
            [100, 200, 400, 800].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn delays_are_capped() {
        let mut policy = ReconnectPolicy::new(config(1_000, 2_000, 4.0, 0));

        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(config(100, 1_000, 2.0, 3));

        for expected in 1..=3 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt_count(), expected);
        }
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..config(1_000, 10_000, 2.0, 0)
            });

            let millis = policy.next_delay().unwrap().as_millis();

            assert!((900..=1_100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let config = config(500, 30_000, 2.0, 0);
        assert_eq!(config.base_delay(10_000), Duration::from_secs(30));
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        for _ in 0..1_000 {
            assert!(policy.next_delay().is_some());
        }
    }
}
