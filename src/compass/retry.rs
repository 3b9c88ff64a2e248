//! Bounded exponential backoff with randomized jitter.

use rand::Rng;
use std::time::Duration;

/// Retry budget and backoff shape shared by requests and department retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_interval: Duration,
    pub backoff_factor: f64,
    /// Fraction of the computed delay added or removed at random (0.5 = ±50%).
    pub randomness: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_interval: Duration::from_millis(50),
            backoff_factor: 2.0,
            randomness: 0.5,
            max_interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failure (1-based), without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay to wait after the `attempt`-th failure, with jitter applied.
    ///
    /// The result stays within `nominal · (1 ± randomness)` and never exceeds
    /// `max_interval`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let spread = self.randomness.clamp(0.0, 1.0);
        let factor = if spread > 0.0 {
            rand::rng().random_range((1.0 - spread)..=(1.0 + spread))
        } else {
            1.0
        };
        let jittered = nominal * factor;
        if jittered >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Whether another attempt is allowed after `attempt` attempts have been made.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}
