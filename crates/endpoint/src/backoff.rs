//! Capped exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Default base delay.
pub const DEFAULT_BASE: Duration = Duration::from_millis(20);
/// Default growth factor.
pub const DEFAULT_FACTOR: u32 = 2;
/// Default cap.
pub const DEFAULT_CAP: Duration = Duration::from_millis(180_000);

/// Reconnection delay generator.
///
/// The n-th call to [`Backoff::next_delay`] returns a uniformly random
/// duration in `[0, min(cap, base * factor^n))`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: u32,
    cap: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_FACTOR, DEFAULT_CAP)
    }
}

impl Backoff {
    /// Create a backoff with explicit parameters.
    pub fn new(base: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            base,
            factor: factor.max(1),
            cap,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for `attempt`.
    pub fn duration(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.cap)
    }

    /// Jittered delay for the current attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let interval = self.duration(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if interval.is_zero() {
            return interval;
        }
        let nanos = interval.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(rand::rng().random_range(0..nanos))
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let backoff = Backoff::default();
        assert_eq!(backoff.duration(0), Duration::from_millis(20));
        assert_eq!(backoff.duration(1), Duration::from_millis(40));
        assert_eq!(backoff.duration(5), Duration::from_millis(640));
    }

    #[test]
    fn test_duration_is_monotonic_and_capped() {
        let backoff = Backoff::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let current = backoff.duration(attempt);
            assert!(current >= previous, "attempt {attempt}");
            assert!(current <= DEFAULT_CAP);
            previous = current;
        }
        assert_eq!(backoff.duration(63), DEFAULT_CAP);
    }

    #[test]
    fn test_jitter_stays_below_interval() {
        let mut backoff = Backoff::default();
        for attempt in 0..40 {
            let bound = backoff.duration(attempt);
            let delay = backoff.next_delay();
            assert!(delay < bound, "attempt {attempt}: {delay:?} >= {bound:?}");
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() < Duration::from_millis(20));
    }
}
