//! Exponential backoff with a cap
//!
//! ```text
//! delay         = base_delay * 2^retry_count
//! delay         = min(delay, max_delay)
//! next_retry_at = now + delay
//! ```
//!
//! With the defaults (30s base, 1h cap) the sequence is
//! 30s, 1m, 2m, 4m, 8m, 16m, 32m, 1h, 1h, ...

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Largest cap a configuration may ask for
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Deterministic backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    /// Create a policy; `max_delay` is raised to `base_delay` if smaller
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Base delay
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Cap
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to wait after a failure at `retry_count`
    pub fn delay(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Absolute time of the next attempt
    ///
    /// Saturates at the end of chrono's range rather than overflowing.
    pub fn next_retry_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..=5).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 480, 960]);
    }

    #[test]
    fn test_next_retry_at_saturates() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(u64::MAX / 4));
        let near_end = DateTime::<Utc>::MAX_UTC - chrono::Duration::days(1);
        assert_eq!(policy.next_retry_at(near_end, 40), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(6).as_secs(), 1920);
        assert_eq!(policy.delay(7).as_secs(), 3600);
        assert_eq!(policy.delay(20).as_secs(), 3600);
    }

    #[test]
    fn test_huge_retry_count_does_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(31), policy.max_delay());
        assert_eq!(policy.delay(32), policy.max_delay());
        assert_eq!(policy.delay(u32::MAX), policy.max_delay());
    }

    #[test]
    fn test_next_retry_at() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.next_retry_at(now, 0) - now, chrono::Duration::seconds(30));
        assert_eq!(policy.next_retry_at(now, 9) - now, chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_max_raised_to_base() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.delay(0), Duration::from_secs(10));
        assert_eq!(policy.delay(3), Duration::from_secs(10));
    }
}
