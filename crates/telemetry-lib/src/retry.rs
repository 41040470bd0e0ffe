//! Exponential backoff with jitter for sink redelivery

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for the exponential term
    pub max_delay: Duration,
    /// Total delivery attempts before a batch is dropped
    pub max_attempts: u32,
    /// Upper bound of the uniformly random extra delay
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (0-based): `min(base * 2^attempt, max) + jitter`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff(attempt) + self.random_jitter()
    }

    /// The deterministic exponential part of the delay
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// True when `attempts` deliveries have been made and no more are allowed
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts.max(1)
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            max_attempts: 4,
            jitter: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(800));
        assert_eq!(p.backoff(4), Duration::from_millis(1_000));
        assert_eq!(p.backoff(31), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_bounded() {
        let p = policy();
        for attempt in 0..6 {
            let delay = p.delay_for(attempt);
            assert!(delay >= p.backoff(attempt));
            assert!(delay < p.backoff(attempt) + p.jitter);
        }
    }

    #[test]
    fn test_no_jitter() {
        let p = RetryPolicy {
            jitter: Duration::ZERO,
            ..policy()
        };
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_exhaustion() {
        let p = policy();
        assert!(!p.is_exhausted(3));
        assert!(p.is_exhausted(4));
        let never_zero = RetryPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert!(!never_zero.is_exhausted(0));
        assert!(never_zero.is_exhausted(1));
    }
}
