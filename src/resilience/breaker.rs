//! Failure-count circuit breaker
//!
//! `Closed` passes calls through and counts consecutive failures. Reaching
//! the threshold opens the circuit: calls are rejected with
//! `ParleyError::CircuitOpen` without running the operation. Once the
//! recovery timeout has elapsed a single probe call is let through; its
//! outcome closes the circuit again or restarts the open period.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{ParleyError, Result};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker
    ///
    /// A zero threshold is treated as one.
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Name used in logs and in `CircuitOpen` errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    ///
    /// An open breaker whose recovery timeout has elapsed still reports
    /// `Open` until a call actually probes it.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures counted while closed
    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    /// Force the breaker back to `Closed`
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    /// Run `op` through the breaker
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::CircuitOpen` without calling `op` while the
    /// circuit is open (or a half-open probe is already running). Otherwise
    /// returns whatever `op` returned.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        let result = op().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(err) => self.on_failure(err),
        }
        result
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Closed {
            return Ok(());
        }
        // While half-open, `opened_at` marks the probe start; a probe that
        // was abandoned for a whole recovery period is replaced.
        let elapsed = inner
            .opened_at
            .map(|t| t.elapsed() >= self.recovery_timeout)
            .unwrap_or(true);
        if elapsed {
            tracing::info!("Circuit breaker '{}' half-open, probing", self.name);
            inner.state = CircuitState::HalfOpen;
            inner.opened_at = Some(Instant::now());
            Ok(())
        } else {
            tracing::debug!("Circuit breaker '{}' rejected call ({})", self.name, inner.state);
            Err(self.rejected())
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("Circuit breaker '{}' closed after successful probe", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self, err: &anyhow::Error) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen | CircuitState::Open => {
                tracing::warn!(
                    "Circuit breaker '{}' probe failed, reopening: {:#}",
                    self.name,
                    err
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    tracing::error!(
                        "Circuit breaker '{}' opened after {} failures",
                        self.name,
                        inner.failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    fn rejected(&self) -> anyhow::Error {
        ParleyError::CircuitOpen {
            name: self.name.clone(),
        }
        .into()
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
