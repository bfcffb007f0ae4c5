// ── Authentication retry policy ──
//
// Bounds how long the poll loop keeps trying to obtain a token before the
// process gives up, and how far apart the attempts are.

use std::time::Duration;

/// Exponential backoff with a hard cap on consecutive attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed grants after which authentication is fatal.
    pub max_attempts: u32,

    /// Delay after the first failure. Default: 5s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 5min.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th consecutive failure (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        // Deterministic "jitter" seeded from the attempt number.
        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        let with_jitter = (capped * jitter_factor).clamp(0.0, self.max_delay.as_secs_f64());

        Duration::from_secs_f64(with_jitter)
    }

    /// Returns `true` once `failures` consecutive failures exhaust the budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(5));
        assert_eq!(policy.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let policy = RetryPolicy::default();

        let d0 = policy.delay(0);
        let d1 = policy.delay(1);
        let d2 = policy.delay(2);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };

        for attempt in [10, 31, 64, u32::MAX] {
            let delay = policy.delay(attempt);
            assert!(
                delay <= Duration::from_secs(10),
                "delay at attempt {attempt} ({delay:?}) exceeds max_delay"
            );
        }
    }

    #[test]
    fn budget_is_exhausted_at_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }
}
