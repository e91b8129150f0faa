//! Test utilities for Parley
//!
//! Temporary directory management, a scripted backend adapter and
//! assertion helpers shared by unit tests.

use crate::backend::{AdapterKind, BackendAdapter, BackendReply, BackendRequest};
use crate::config::Config;
use crate::error::{ParleyError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = format!("{:#}", e);
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// Create a test configuration with default values
pub fn test_config() -> Config {
    Config::default()
}

/// Create a test configuration YAML string
pub fn test_config_yaml() -> String {
    r#"
backend:
  default: direct
  timeout_seconds: 30
  streaming:
    command: fake-cli
    max_turns: 2
  direct:
    api_base: http://localhost:9999
    history_turns: 4

resilience:
  direct:
    max_retries: 1
    initial_delay_ms: 10

session:
  title_max_chars: 20
"#
    .to_string()
}

/// Backend adapter that replays a fixed script of outcomes
///
/// Each call consumes the next scripted outcome; once the script runs out
/// every further call fails with a generic backend error.
pub struct ScriptedAdapter {
    kind: AdapterKind,
    script: Mutex<VecDeque<std::result::Result<BackendReply, ParleyError>>>,
    requests: Mutex<Vec<BackendRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    remediation: Option<BackendReply>,
}

impl ScriptedAdapter {
    fn with_kind(kind: AdapterKind, script: Vec<std::result::Result<BackendReply, ParleyError>>) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
            remediation: None,
        }
    }

    pub fn direct(script: Vec<std::result::Result<BackendReply, ParleyError>>) -> Self {
        Self::with_kind(AdapterKind::Direct, script)
    }

    pub fn streaming(script: Vec<std::result::Result<BackendReply, ParleyError>>) -> Self {
        Self::with_kind(AdapterKind::Streaming, script)
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Offer this reply for any final failure
    pub fn with_remediation(mut self, reply: BackendReply) -> Self {
        self.remediation = Some(reply);
        self
    }

    /// Number of calls started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    /// Full requests received, in call order
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => Err(err.into()),
            None => Err(ParleyError::Backend("script exhausted".into()).into()),
        }
    }

    fn remediate(&self, _error: &anyhow::Error) -> Option<BackendReply> {
        self.remediation.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    #[should_panic(expected = "does not contain")]
    fn test_assert_error_contains_wrong_message() {
        let result: Result<()> = Err(ParleyError::Config("different error".to_string()).into());
        assert_error_contains(result, "not present");
    }

    #[test]
    fn test_test_config_yaml() {
        let config: Config = serde_yaml::from_str(&test_config_yaml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend.default, "direct");
        assert_eq!(config.session.title_max_chars, 20);
        assert_eq!(config.resilience.direct.max_retries, 1);
        assert_eq!(config.backend.direct.api_base, "http://localhost:9999");
        assert_eq!(test_config().backend.default, "streaming");
    }

    #[tokio::test]
    async fn test_scripted_adapter_replays_then_exhausts() {
        let adapter = ScriptedAdapter::direct(vec![Ok(BackendReply::text("one"))]);
        let first = adapter.send(&BackendRequest::new("a")).await.unwrap();
        assert_eq!(first.text, "one");
        assert_error_contains(adapter.send(&BackendRequest::new("b")).await, "script exhausted");
        assert_eq!(adapter.calls(), 2);
        assert_eq!(adapter.prompts(), vec!["a".to_string(), "b".to_string()]);
    }
}
