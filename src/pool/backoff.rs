//! Capped exponential retry backoff

use std::time::Duration;

/// Computes retry delays for a bounded number of dial attempts.
///
/// The delay before retrying attempt `i` (0-based) is `min(base * 2^i, cap)`.
/// No delay is applied before the first attempt.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            // A policy that never dials is useless; clamp to one attempt.
            max_attempts: max_attempts.max(1),
        }
    }

    /// Total dial attempts, first attempt included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to sleep after attempt `attempt` (0-based) fails
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 6);

        let delays: Vec<u64> = (0..6).map(|i| policy.delay(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_cap_applies_forever() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 64);

        assert_eq!(policy.delay(31), Duration::from_secs(10));
        assert_eq!(policy.delay(63), Duration::from_secs(10));
    }

    #[test]
    fn test_subsecond_base() {
        let policy = BackoffPolicy::new(Duration::from_millis(50), Duration::from_millis(400), 5);

        assert_eq!(policy.delay(0), Duration::from_millis(50));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(400));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 0);
        assert_eq!(policy.max_attempts(), 1);
    }
}
