//! Retry helpers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with linearly increasing delay.
///
/// After failed attempt `n` (1-based) the caller waits `n * base_delay`
/// before attempt `n + 1`. There is no wait after the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,

    /// Delay unit, in seconds.
    pub base_delay_secs: u64,
}

impl RetryConfig {
    /// Create a retry configuration.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_secs: base_delay.as_secs(),
        }
    }

    /// Policy used while a freshly imported machine is booting:
    /// three attempts, ten seconds per step.
    pub fn for_boot() -> Self {
        Self::new(3, Duration::from_secs(10))
    }

    /// Delay to wait after the given failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_delay_secs.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_boot()
    }
}

/// Something that can block the current thread for a while.
pub trait Sleeper: Send + Sync {
    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Run `attempt` until `succeeded` accepts its outcome or attempts run out.
///
/// `attempt` receives the 1-based attempt number. Returns `Ok` with the first
/// accepted outcome, or `Err` with the outcome of the last attempt.
pub fn retry_with_backoff<R, F, P>(
    config: &RetryConfig,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut attempt: F,
    succeeded: P,
) -> std::result::Result<R, R>
where
    F: FnMut(u32) -> R,
    P: Fn(&R) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut n = 1;

    loop {
        tracing::info!(operation, attempt = n, max_attempts, "attempting");
        let outcome = attempt(n);

        if succeeded(&outcome) {
            return Ok(outcome);
        }

        if n >= max_attempts {
            tracing::warn!(operation, attempts = n, "giving up");
            return Err(outcome);
        }

        let delay = config.delay_after(n);
        tracing::info!(
            operation,
            attempt = n,
            delay_secs = delay.as_secs(),
            "attempt failed, waiting before retry"
        );
        sleeper.sleep(delay);
        n += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records requested sleeps instead of blocking.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSleeper {
        pub(crate) slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub(crate) fn durations(&self) -> Vec<Duration> {
            self.slept.lock().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().push(duration);
        }
    }

    #[test]
    fn test_delay_is_linear_in_attempt() {
        let config = RetryConfig::for_boot();
        assert_eq!(config.delay_after(1), Duration::from_secs(10));
        assert_eq!(config.delay_after(2), Duration::from_secs(20));
        assert_eq!(config.delay_after(3), Duration::from_secs(30));
    }

    #[test]
    fn test_success_on_first_attempt_does_not_sleep() {
        let sleeper = RecordingSleeper::default();
        let result = retry_with_backoff(
            &RetryConfig::for_boot(),
            &sleeper,
            "test",
            |n| n,
            |_| true,
        );
        assert_eq!(result, Ok(1));
        assert!(sleeper.durations().is_empty());
    }

    #[test]
    fn test_exhaustion_returns_last_outcome() {
        let sleeper = RecordingSleeper::default();
        let result = retry_with_backoff(
            &RetryConfig::for_boot(),
            &sleeper,
            "test",
            |n| format!("failure {}", n),
            |_| false,
        );
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(
            sleeper.durations(),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
    }

    #[test]
    fn test_success_after_retries() {
        let sleeper = RecordingSleeper::default();
        let result = retry_with_backoff(
            &RetryConfig::new(5, Duration::from_secs(2)),
            &sleeper,
            "test",
            |n| n,
            |n| *n == 3,
        );
        assert_eq!(result, Ok(3));
        assert_eq!(
            sleeper.durations(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result = retry_with_backoff(
            &RetryConfig::new(0, Duration::from_secs(1)),
            &sleeper,
            "test",
            |_| {
                calls += 1;
            },
            |_| false,
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
