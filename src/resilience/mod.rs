//! Retry and circuit-breaker wrappers for fallible async operations
//!
//! The two policies compose with retry on the inside: one logical call,
//! including all of its retries, is a single attempt as far as the breaker is
//! concerned. An open breaker therefore never runs the retried operation.

pub mod breaker;
pub mod retry;

use std::future::Future;
use std::time::Duration;

pub use breaker::{CircuitBreaker, CircuitState};
pub use retry::{RetryAttempt, RetryPolicy, RetryPredicate};

use crate::config::ResilienceSettings;
use crate::error::Result;

/// Retry-with-backoff wrapped in a circuit breaker
#[derive(Debug)]
pub struct ResiliencePolicy {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResiliencePolicy {
    /// Compose an existing retry policy and breaker
    pub fn new(retry: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self { retry, breaker }
    }

    /// Build a policy named `name` from configuration
    pub fn from_settings(name: &str, settings: &ResilienceSettings) -> Self {
        Self::new(
            RetryPolicy::new(
                settings.max_retries,
                Duration::from_millis(settings.initial_delay_ms),
                settings.backoff_factor,
            ),
            CircuitBreaker::new(
                name,
                settings.failure_threshold,
                Duration::from_secs(settings.recovery_timeout_seconds),
            ),
        )
    }

    /// Restrict which failures are retried
    pub fn retry_if(mut self, predicate: RetryPredicate) -> Self {
        self.retry = self.retry.retry_if(predicate);
        self
    }

    /// The breaker guarding this policy
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The retry parameters of this policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` with retries inside the circuit breaker
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let label = self.breaker.name().to_string();
        self.breaker
            .call(|| self.retry.run(&label, op))
            .await
    }
}
