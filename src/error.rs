//! Error types for Parley
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Parley operations
///
/// Normalization and session store operations never produce these; they
/// always repair input into a canonical value. Failures surface only from the
/// send pipeline, the backend adapters, configuration and storage.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected at the service boundary (empty or oversized prompt)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend reported missing or rejected credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The backend executable could not be found
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// The backend process exited unsuccessfully
    #[error("Backend command failed (exit code {}): {message}", code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    CommandFailed {
        /// Process exit code, when the process was not killed by a signal
        code: Option<i32>,
        /// Captured stderr or a description of the failure
        message: String,
    },

    /// A single backend attempt exceeded its hard bound
    #[error("Backend call timed out after {seconds}s")]
    Timeout {
        /// Configured bound in seconds
        seconds: u64,
    },

    /// Generic backend failure with the underlying message preserved
    #[error("Backend error: {0}")]
    Backend(String),

    /// The circuit breaker rejected the call without attempting it
    #[error("Service '{name}' is temporarily unavailable (circuit open)")]
    CircuitOpen {
        /// Name of the breaker that rejected the call
        name: String,
    },

    /// No session with the given id exists in the store
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A send is already running for the session
    #[error("A send is already in progress for session {0}")]
    SendInProgress(String),

    /// Session document storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ParleyError {
    /// Returns true for the failures a backend call can produce
    /// (authentication, missing binary, non-zero exit, timeout, generic).
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            ParleyError::Authentication(_)
                | ParleyError::BackendNotFound(_)
                | ParleyError::CommandFailed { .. }
                | ParleyError::Timeout { .. }
                | ParleyError::Backend(_)
                | ParleyError::Http(_)
        )
    }

    /// Recover a typed error from an `anyhow::Error`.
    ///
    /// Errors that did not originate as a `ParleyError` are wrapped as
    /// `Backend` with their full context chain preserved in the message.
    pub fn from_anyhow(err: anyhow::Error) -> ParleyError {
        match err.downcast::<ParleyError>() {
            Ok(typed) => typed,
            Err(other) => ParleyError::Backend(format!("{:#}", other)),
        }
    }
}

/// Result type alias for Parley operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
