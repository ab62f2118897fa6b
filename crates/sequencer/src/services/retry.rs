//! Bounded exponential retry for leaf operations.
//!
//! The operation classifies each failure: [`RetryableError::Expected`] errors
//! are retried until the time budget runs out, [`RetryableError::Unexpected`]
//! errors stop immediately.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const MAX_BACKOFF_SHIFT: u32 = 16;

/// Stand-in deadline for budgets too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Failure of a single attempt, classified by the caller.
#[derive(Debug)]
pub enum RetryableError<E> {
    /// Transient; try again.
    Expected(E),
    /// Terminal; give up now.
    Unexpected(E),
}

pub fn expected<E>(error: E) -> RetryableError<E> {
    RetryableError::Expected(error)
}

pub fn unexpected<E>(error: E) -> RetryableError<E> {
    RetryableError::Unexpected(error)
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retry cancelled")]
    Cancelled,

    #[error("unexpected error: {0}")]
    Unexpected(E),

    #[error("timeout after {attempts} attempt(s): {last}")]
    Timeout { attempts: u32, last: E },
}

/// Exponential backoff policy with a total time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    timeout: Duration,
    units: Duration,
    jitter: Duration,
    log_errors: bool,
}

impl Exponential {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            units: Duration::from_secs(1),
            jitter: Duration::ZERO,
            log_errors: false,
        }
    }

    pub fn with_units(mut self, units: Duration) -> Self {
        self.units = units;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_error_logging(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Base wait after the `attempt`-th failure (0-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.units.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT))
    }

    fn wait_after(&self, attempt: u32) -> Duration {
        self.backoff(attempt).saturating_add(self.jitter_sample())
    }

    fn jitter_sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Run `operation` until it succeeds, fails unexpectedly, the budget is
    /// spent, or `cancel` fires.
    pub async fn retry<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RetryableError<E>>>,
    {
        let now = Instant::now();
        let deadline = now
            .checked_add(self.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = operation() => outcome,
            };
            attempts += 1;

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(RetryableError::Unexpected(e)) => return Err(RetryError::Unexpected(e)),
                Err(RetryableError::Expected(e)) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(RetryError::Timeout {
                    attempts,
                    last: error,
                });
            }

            let wait = self.wait_after(attempts - 1).min(deadline - now);
            if self.log_errors {
                warn!(
                    attempt = attempts,
                    retry_in_ms = wait.as_millis() as u64,
                    error = %error,
                    "Retrying after expected error"
                );
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles() {
        let policy = Exponential::new(Duration::from_secs(60)).with_units(Duration::from_secs(5));
        assert_eq!(policy.backoff(0), Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(40));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy =
            Exponential::new(Duration::from_secs(1)).with_jitter(Duration::from_millis(20));
        for _ in 0..100 {
            assert!(policy.jitter_sample() <= Duration::from_millis(20));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_expected_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = Exponential::new(Duration::from_secs(60)).with_units(Duration::from_secs(1));

        let counter = calls.clone();
        let result: Result<u32, RetryError<String>> = policy
            .retry(&CancellationToken::new(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(expected(format!("attempt {n} failed")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = Exponential::new(Duration::from_secs(60));

        let counter = calls.clone();
        let result: Result<(), RetryError<String>> = policy
            .retry(&CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(unexpected("not found".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Unexpected(ref e)) if e == "not found"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_saturates() {
        let policy = Exponential::new(Duration::MAX)
            .with_units(Duration::MAX)
            .with_jitter(Duration::MAX);
        assert_eq!(policy.backoff(3), Duration::MAX);
        assert_eq!(policy.wait_after(3), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_does_not_overflow() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = Exponential::new(Duration::MAX).with_units(Duration::from_secs(1));
        let started = Instant::now();

        let counter = calls.clone();
        let result: Result<u32, RetryError<String>> = policy
            .retry(&CancellationToken::new(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(expected("registry unavailable".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_attempts_and_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = Exponential::new(Duration::from_secs(10)).with_units(Duration::from_secs(1));
        let started = Instant::now();

        let counter = calls.clone();
        let result: Result<(), RetryError<String>> = policy
            .retry(&CancellationToken::new(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(expected(format!("failure {n}"))) }
            })
            .await;

        // attempts at t = 0, 1, 3, 7 and a final one at the 10s deadline
        match result {
            Err(RetryError::Timeout { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last, "failure 4");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let policy = Exponential::new(Duration::from_secs(600)).with_units(Duration::from_secs(30));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result: Result<(), RetryError<String>> = policy
            .retry(&cancel, || async { Err(expected("busy".to_string())) })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_calls_operation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> = Exponential::new(Duration::from_secs(1))
            .retry(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
