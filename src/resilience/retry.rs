//! Retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Upper bound on the sleep between two attempts
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Decides whether a failed attempt may be retried
pub type RetryPredicate = fn(&anyhow::Error) -> bool;

/// Report of one failed attempt, handed to observers before the next one
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// 1-based attempt number that just failed
    pub attempt: u32,
    /// Total attempts allowed (`max_retries + 1`)
    pub max_attempts: u32,
    /// Delay before the next attempt; `None` when no attempt follows
    pub next_delay: Option<Duration>,
    /// The failure
    pub error: &'a anyhow::Error,
}

/// Retry-with-backoff parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    /// Sleep before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,
    retry_if: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }
}

impl RetryPolicy {
    /// Creates a policy that retries every failure
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor,
            retry_if: None,
        }
    }

    /// Only retry failures for which `predicate` returns true
    ///
    /// A failure the predicate rejects is returned to the caller at once.
    pub fn retry_if(mut self, predicate: RetryPredicate) -> Self {
        self.retry_if = Some(predicate);
        self
    }

    /// Run `op`, retrying failures with backoff
    ///
    /// The last failure is returned unchanged once retries are exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_observer(label, op, |_| {}).await
    }

    /// Like [`RetryPolicy::run`], reporting every failed attempt to `observer`
    pub async fn run_with_observer<T, F, Fut, O>(
        &self,
        label: &str,
        mut op: F,
        observer: O,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        O: Fn(&RetryAttempt<'_>),
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut delay = self.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = self.retry_if.map(|p| p(&err)).unwrap_or(true);
            let last = attempt >= max_attempts || !retryable;

            observer(&RetryAttempt {
                attempt,
                max_attempts,
                next_delay: if last { None } else { Some(delay) },
                error: &err,
            });

            if last {
                if retryable {
                    tracing::error!("All {} attempts failed for {}: {:#}", attempt, label, err);
                } else {
                    tracing::warn!("Attempt {} for {} failed permanently: {:#}", attempt, label, err);
                }
                return Err(err);
            }

            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempt {}/{} failed for {}: {:#}. Retrying",
                attempt,
                max_attempts,
                label,
                err
            );
            tokio::time::sleep(delay).await;
            delay = self.next_delay(delay);
        }
    }

    /// Grow `delay` by the backoff factor, saturating at [`MAX_RETRY_DELAY`]
    fn next_delay(&self, delay: Duration) -> Duration {
        let factor = if self.backoff_factor.is_nan() {
            1.0
        } else {
            self.backoff_factor.max(1.0)
        };
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), 2.0)
    }

    #[tokio::test]
    async fn test_permanent_failure_invokes_one_plus_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(2)
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("always"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_final_error_is_returned_unchanged() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(1)
            .run("op", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(ParleyError::CommandFailed {
                    code: Some(n as i32),
                    message: format!("attempt {}", n),
                }
                .into())
            })
            .await;
        let err = result.unwrap_err();
        match err.downcast_ref::<ParleyError>() {
            Some(ParleyError::CommandFailed { code, message }) => {
                assert_eq!(*code, Some(1));
                assert_eq!(message, "attempt 1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = fast(3)
            .run("op", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("flaky"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_every_failure_is_reported_with_growing_delay() {
        let seen = Mutex::new(Vec::new());
        let policy = RetryPolicy::new(2, Duration::from_millis(2), 3.0);
        let _ = policy
            .run_with_observer(
                "op",
                || async { Err::<(), _>(anyhow::anyhow!("x")) },
                |a| seen.lock().unwrap().push((a.attempt, a.next_delay)),
            )
            .await;
        let seen = seen.into_inner().unwrap();
        assert_eq!(
            seen,
            vec![
                (1, Some(Duration::from_millis(2))),
                (2, Some(Duration::from_millis(6))),
                (3, None),
            ]
        );
    }

    #[tokio::test]
    async fn test_predicate_stops_non_retryable_failures() {
        let calls = AtomicU32::new(0);
        let policy = fast(5).retry_if(|e| {
            !matches!(
                e.downcast_ref::<ParleyError>(),
                Some(ParleyError::Authentication(_))
            )
        });
        let counter = &calls;
        let result: Result<()> = policy
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ParleyError::Authentication("no key".into()).into())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_huge_backoff_factor_saturates_delay() {
        for factor in [1e300, f64::INFINITY, f64::NAN] {
            let policy = RetryPolicy::new(2, Duration::from_millis(1), factor);
            let mut delay = Duration::from_millis(1);
            for _ in 0..4 {
                delay = policy.next_delay(delay);
                assert!(delay <= MAX_RETRY_DELAY);
            }
        }
        let policy = RetryPolicy::new(2, MAX_RETRY_DELAY, 2.0);
        assert_eq!(policy.next_delay(MAX_RETRY_DELAY), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_huge_backoff_factor_does_not_abort_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(1, Duration::from_millis(1), 1e300);
        let result: Result<()> = policy
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("x"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_retries_calls_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let _: Result<()> = fast(0)
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("x"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
