//! Exponential backoff with jitter for retry loops.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule: `base * 2^(attempt - 1)` capped at `max`,
/// with up to 20% random jitter added to spread out retry storms.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Jitter fraction applied on top of the computed delay.
    const JITTER: f64 = 0.2;

    /// Create a new backoff schedule.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the given attempt (1-based), without jitter.
    ///
    /// Attempt 0 and 1 both map to the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max);
        delay.min(self.max)
    }

    /// Delay before the given attempt with jitter applied.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..Self::JITTER);
        delay.mul_f64(1.0 + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(16));
        assert_eq!(backoff.delay_for(6), Duration::from_secs(32));
        // Capped at max from here on
        assert_eq!(backoff.delay_for(7), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(8), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_attempt_zero_maps_to_base() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(0), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_large_attempt_does_not_overflow() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(300));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_jittered_delay_within_bounds() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for attempt in 1..8 {
            let plain = backoff.delay_for(attempt);
            let jittered = backoff.jittered_delay_for(attempt);
            assert!(jittered >= plain);
            assert!(jittered <= plain.mul_f64(1.0 + Backoff::JITTER));
        }
    }
}
