//! Bounded retry with a constant delay between attempts.
//!
//! Every error is treated as transient: there is no retryable/fatal split.
//! The delay is fixed, and there is no sleep after the final failed attempt.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::error;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// How many times to call an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Exactly one attempt, no delay.
    pub fn single() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Call `operation` until it succeeds or the attempts run out.
    ///
    /// Each failure is logged with its attempt number. The error of the last
    /// attempt is handed back inside [`RetryExhausted`].
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    error!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "Attempt {} failed: {}",
                        attempt,
                        err
                    );
                    if attempt >= self.max_attempts {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// All attempts of a retried operation failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E> RetryExhausted<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation failed after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryExhausted<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn failure_lines(lines: &[&str]) -> usize {
        lines
            .iter()
            .filter(|l| l.contains("Attempt") && l.contains("failed:"))
            .count()
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(2));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_is_returned_without_delay() {
        let started = tokio::time::Instant::now();
        let value = RetryPolicy::default()
            .run(|| async { Ok::<_, String>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn succeeds_after_k_failures_and_logs_k_lines() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_secs(1));

        let counter = calls.clone();
        let value = policy
            .run(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(format!("transient {}", n))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(logs_contain("Attempt 1 failed: transient 0"));
        assert!(logs_contain("Attempt 2 failed: transient 1"));
        logs_assert(|lines: &[&str]| match failure_lines(lines) {
            2 => Ok(()),
            n => Err(format!("expected 2 failure lines, got {}", n)),
        });
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn always_failing_exhausts_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(4, Duration::from_secs(3));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let err = policy
            .run(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("refused")
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, "refused");
        // Three inter-attempt delays, none after the last failure.
        assert_eq!(started.elapsed(), Duration::from_secs(9));
        logs_assert(|lines: &[&str]| match failure_lines(lines) {
            4 => Ok(()),
            n => Err(format!("expected 4 failure lines, got {}", n)),
        });
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_never_sleeps() {
        let started = tokio::time::Instant::now();
        let err = RetryPolicy::single()
            .run(|| async { Err::<(), _>("nope") })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(
            err.to_string(),
            "operation failed after 1 attempt(s): nope"
        );
    }
}
