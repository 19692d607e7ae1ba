// crates/resilience/src/backoff.rs
//! Exponential backoff with bounded jitter

use rand::Rng;
use std::time::Duration;

/// Computes the delay to wait before retrying an attempt
///
/// The raw delay is `base_delay * multiplier^(attempt - 1)`, capped at
/// `max_delay`. A uniform offset in `[-jitter, +jitter]` is then added and the
/// result clamped back into `[0, max_delay]`. The calculator holds no mutable
/// state and can be shared freely between tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffCalculator {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: Duration,
}

impl BackoffCalculator {
    /// Creates a calculator with the given base delay, a 30 second ceiling,
    /// a multiplier of 2 and no jitter
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Sets the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter range applied in both directions
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Calculates the delay for a given attempt (1-based; 0 is treated as 1)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.scaled_delay(attempt, 1.0)
    }

    /// Calculates the delay for an attempt with the raw delay scaled by `factor`
    /// before the ceiling and jitter are applied
    pub fn scaled_delay(&self, attempt: u32, factor: f64) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(i32::MAX as u32) as i32;
        let max = self.max_delay.as_secs_f64();

        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent) * factor;
        // f64::min drops NaN, so a degenerate multiplier lands on the ceiling
        let capped = raw.min(max);

        let jitter = self.jitter.as_secs_f64();
        let jittered = if jitter > 0.0 {
            capped + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            capped
        };

        if jittered >= max {
            self.max_delay
        } else if jittered <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(jittered)
        }
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
