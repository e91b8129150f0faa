//! Backend adapters for Parley
//!
//! Two interchangeable strategies reach the AI backend: a streaming adapter
//! that drives a child process emitting JSON events, and a direct adapter
//! that makes one HTTPS completion call. Both implement [`BackendAdapter`]
//! and are used through [`ResilientBackend`], which adds retries, a circuit
//! breaker and a hard per-attempt timeout.
//!
//! Adapter selection is explicit. A failing adapter is reported to the
//! caller; there is no automatic switch to the other one.

pub mod direct;
pub mod events;
pub mod streaming;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use direct::DirectAdapter;
pub use streaming::StreamingAdapter;

use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::resilience::{CircuitState, ResiliencePolicy};
use crate::session::{Message, Metadata};

/// Which adapter strategy an implementation follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Child process emitting JSON events; stateful via correlation token
    Streaming,
    /// One-shot HTTPS completion; stateless
    Direct,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Streaming => "streaming",
            AdapterKind::Direct => "direct",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to one backend call
#[derive(Debug, Clone, Default)]
pub struct BackendRequest {
    /// The new user prompt
    pub prompt: String,
    /// Token from a previous reply of the same adapter, if any
    pub correlation: Option<String>,
    /// Prior messages of the session, oldest first, excluding the prompt
    pub history: Vec<Message>,
}

impl BackendRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_correlation(mut self, correlation: Option<String>) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Uniform result of a backend call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackendReply {
    /// Assistant text to show
    pub text: String,
    /// Reply annotations (tokens, cost, turns); absent means not reported
    pub metadata: Metadata,
    /// Token to pass on the next call to the same adapter
    pub new_correlation: Option<String>,
    /// Error the backend reported while still producing a reply
    pub error: Option<String>,
}

impl BackendReply {
    /// Creates a successful reply with no metadata
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// True when the reply describes a backend-side failure
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Contract shared by both adapter strategies
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Strategy this adapter implements
    fn kind(&self) -> AdapterKind;

    /// Perform one backend call
    ///
    /// # Errors
    ///
    /// Returns a `ParleyError` from the backend failure family
    /// (authentication, missing binary, non-zero exit, generic).
    async fn send(&self, request: &BackendRequest) -> Result<BackendReply>;

    /// Map a final failure to a user-facing remediation reply
    ///
    /// Called once retries are exhausted. Returning `None` surfaces the
    /// error to the caller unchanged.
    fn remediate(&self, _error: &anyhow::Error) -> Option<BackendReply> {
        None
    }
}

/// Failures worth another attempt
///
/// Missing credentials, a missing executable and rejected input will not
/// fix themselves between attempts.
pub fn is_transient(err: &anyhow::Error) -> bool {
    !matches!(
        err.downcast_ref::<ParleyError>(),
        Some(ParleyError::Authentication(_))
            | Some(ParleyError::BackendNotFound(_))
            | Some(ParleyError::Validation(_))
            | Some(ParleyError::Config(_))
    )
}

/// An adapter behind retries, a circuit breaker and a per-attempt timeout
pub struct ResilientBackend {
    adapter: Arc<dyn BackendAdapter>,
    policy: ResiliencePolicy,
    timeout: Duration,
}

impl std::fmt::Debug for ResilientBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientBackend")
            .field("kind", &self.adapter.kind())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ResilientBackend {
    pub fn new(adapter: Arc<dyn BackendAdapter>, policy: ResiliencePolicy, timeout: Duration) -> Self {
        Self {
            adapter,
            policy,
            timeout,
        }
    }

    /// Strategy of the wrapped adapter
    pub fn kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    /// State of this adapter's circuit breaker
    pub fn breaker_state(&self) -> CircuitState {
        self.policy.breaker().state()
    }

    /// Call the adapter with full protection
    ///
    /// Each attempt is bounded by the timeout; a timed-out attempt counts as
    /// a failure for both retry and breaker. Once retries are exhausted the
    /// adapter gets a chance to turn the failure into a remediation reply.
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::CircuitOpen` when the breaker rejects the call,
    /// `ParleyError::Timeout` when the last attempt timed out, or the
    /// adapter's own error when it offers no remediation.
    pub async fn send(&self, request: &BackendRequest) -> Result<BackendReply> {
        let adapter = &self.adapter;
        let timeout = self.timeout;
        let kind = adapter.kind();

        let outcome = self
            .policy
            .call(move || async move {
                tracing::debug!(adapter = %kind, "Calling backend");
                match tokio::time::timeout(timeout, adapter.send(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ParleyError::Timeout {
                        seconds: timeout.as_secs(),
                    }
                    .into()),
                }
            })
            .await;

        match outcome {
            Ok(reply) => Ok(reply),
            Err(err) => match self.adapter.remediate(&err) {
                Some(reply) => {
                    tracing::warn!(adapter = %kind, "Backend failed, returning remediation: {:#}", err);
                    Ok(reply)
                }
                None => Err(err),
            },
        }
    }
}

/// The two configured adapters, selected explicitly per send
#[derive(Debug)]
pub struct Backends {
    streaming: ResilientBackend,
    direct: ResilientBackend,
}

impl Backends {
    pub fn new(streaming: ResilientBackend, direct: ResilientBackend) -> Self {
        Self { streaming, direct }
    }

    /// Build both adapters and their policies from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.backend.timeout_seconds);
        let streaming = ResilientBackend::new(
            Arc::new(StreamingAdapter::new(config.backend.streaming.clone())),
            ResiliencePolicy::from_settings("streaming", &config.resilience.streaming)
                .retry_if(is_transient),
            timeout,
        );
        let direct = ResilientBackend::new(
            Arc::new(DirectAdapter::new(config.backend.direct.clone())?),
            ResiliencePolicy::from_settings("direct", &config.resilience.direct)
                .retry_if(is_transient),
            timeout,
        );
        Ok(Self::new(streaming, direct))
    }

    /// The streaming adapter when `use_streaming`, the direct one otherwise
    pub fn select(&self, use_streaming: bool) -> &ResilientBackend {
        if use_streaming {
            &self.streaming
        } else {
            &self.direct
        }
    }
}
