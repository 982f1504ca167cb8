//! Inter-retry backoff.
//!
//! Exponential growth from a base delay with symmetric jitter, clamped to an
//! upper bound.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryBackoff {
    pub base: Duration,
    pub max: Duration,
    pub variance_pct: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(5),
            variance_pct: 0.25,
        }
    }
}

impl RetryBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max: base.saturating_mul(25),
            ..Self::default()
        }
    }

    /// No waiting between attempts; release cool-downs still apply.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            variance_pct: 0.0,
        }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    pub fn with_variance(mut self, variance_pct: f64) -> Self {
        self.variance_pct = variance_pct.clamp(0.0, 1.0);
        self
    }

    /// Delay to apply after `failed_attempts` consecutive failures (1-based).
    pub fn delay_for(&self, failed_attempts: usize) -> Duration {
        if self.base.is_zero() || failed_attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = (failed_attempts - 1).min(16) as u32;
        let upper = self.max.max(self.base);
        let delay = self.base.saturating_mul(1u32 << exponent).min(upper);

        if self.variance_pct <= 0.0 {
            return delay;
        }

        let nanos = delay.as_nanos() as f64;
        let variance = nanos * self.variance_pct;
        let jitter = rand::random::<f64>() * variance - (variance / 2.0);
        let jittered = (nanos + jitter).clamp(0.0, upper.as_nanos() as f64);
        Duration::from_nanos(jittered.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_until_capped() {
        let backoff = RetryBackoff::new(Duration::from_millis(100))
            .with_max(Duration::from_millis(350))
            .with_variance(0.0);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_variance() {
        let backoff = RetryBackoff::new(Duration::from_millis(1000)).with_variance(0.2);
        for _ in 0..50 {
            let delay = backoff.delay_for(1);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn none_never_waits() {
        assert_eq!(RetryBackoff::none().delay_for(7), Duration::ZERO);
    }
}
