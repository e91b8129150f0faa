//! Configuration management for Parley
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Backend names accepted by `backend.default` and `--backend`
pub const BACKEND_NAMES: &[&str] = &["streaming", "direct"];

/// Main configuration structure for Parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend adapter settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Retry and circuit-breaker settings per adapter
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Session behavior
    #[serde(default)]
    pub session: SessionConfig,
    /// Session document location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend selection and adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Adapter used when the caller does not choose one: "streaming" or "direct"
    #[serde(default = "default_backend")]
    pub default: String,

    /// Hard bound on a single backend attempt (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Streaming (child process) adapter
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Direct HTTPS adapter
    #[serde(default)]
    pub direct: DirectConfig,
}

fn default_backend() -> String {
    "streaming".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            default: default_backend(),
            timeout_seconds: default_timeout(),
            streaming: StreamingConfig::default(),
            direct: DirectConfig::default(),
        }
    }
}

/// Streaming adapter configuration
///
/// The adapter runs `command args... --max-turns N [resume_flag id] prompt`
/// and reads one JSON event per stdout line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Executable to spawn
    #[serde(default = "default_streaming_command")]
    pub command: String,

    /// Arguments placed before the generated ones
    #[serde(default = "default_streaming_args")]
    pub args: Vec<String>,

    /// Maximum agent turns passed to the backend
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Flag used to pass the correlation token
    #[serde(default = "default_resume_flag")]
    pub resume_flag: String,
}

fn default_streaming_command() -> String {
    "claude".to_string()
}

fn default_streaming_args() -> Vec<String> {
    vec![
        "-p".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ]
}

fn default_max_turns() -> u32 {
    3
}

fn default_resume_flag() -> String {
    "--resume".to_string()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            command: default_streaming_command(),
            args: default_streaming_args(),
            max_turns: default_max_turns(),
            resume_flag: default_resume_flag(),
        }
    }
}

/// Direct adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConfig {
    /// API base URL; `/v1/messages` is appended
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name sent with each request
    #[serde(default = "default_direct_model")]
    pub model: String,

    /// Maximum tokens requested for a completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Number of prior exchanges (user + assistant pairs) sent as context
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_direct_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_history_turns() -> usize {
    10
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_direct_model(),
            max_tokens: default_max_tokens(),
            history_turns: default_history_turns(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Per-adapter resilience settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Settings for the streaming adapter
    #[serde(default = "ResilienceSettings::streaming_defaults")]
    pub streaming: ResilienceSettings,

    /// Settings for the direct adapter
    #[serde(default = "ResilienceSettings::direct_defaults")]
    pub direct: ResilienceSettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            streaming: ResilienceSettings::streaming_defaults(),
            direct: ResilienceSettings::direct_defaults(),
        }
    }
}

/// Retry and circuit-breaker parameters for one adapter
///
/// Fields left out of a config file take the streaming defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Additional attempts after a failure
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Delay multiplier per retry
    pub backoff_factor: f64,
    /// Failed logical calls before the breaker opens
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before probing
    pub recovery_timeout_seconds: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self::streaming_defaults()
    }
}

impl ResilienceSettings {
    fn streaming_defaults() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
        }
    }

    fn direct_defaults() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            ..Self::streaming_defaults()
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ParleyError::Config(format!(
                "resilience.{}.backoff_factor must be a finite number of at least 1.0",
                name
            ))
            .into());
        }
        if self.failure_threshold == 0 {
            return Err(ParleyError::Config(format!(
                "resilience.{}.failure_threshold must be greater than 0",
                name
            ))
            .into());
        }
        Ok(())
    }
}

/// Session behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum characters of the first prompt used as the automatic title
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    /// Longest prompt accepted by `send`
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

fn default_title_max_chars() -> usize {
    50
}

fn default_max_prompt_chars() -> usize {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            title_max_chars: default_title_max_chars(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

/// Session document storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the JSON session document; the platform data dir when unset
    #[serde(default)]
    pub path: Option<String>,
}

/// Log output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON formatted log lines
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from file, environment, and CLI
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command line, for overrides
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Config` if the file exists but cannot be read
    /// or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(backend) = std::env::var("PARLEY_BACKEND") {
            self.backend.default = backend.to_lowercase();
        }

        if let Ok(timeout) = std::env::var("PARLEY_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.backend.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid PARLEY_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(command) = std::env::var("PARLEY_STREAMING_COMMAND") {
            self.backend.streaming.command = command;
        }

        if let Ok(api_base) = std::env::var("PARLEY_DIRECT_API_BASE") {
            self.backend.direct.api_base = api_base;
        }

        if let Ok(model) = std::env::var("PARLEY_DIRECT_MODEL") {
            self.backend.direct.model = model;
        }

        if let Ok(path) = std::env::var("PARLEY_STORAGE_PATH") {
            self.storage.path = Some(path);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Config` naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if !BACKEND_NAMES.contains(&self.backend.default.as_str()) {
            return Err(ParleyError::Config(format!(
                "Invalid backend: {}. Must be one of: {}",
                self.backend.default,
                BACKEND_NAMES.join(", ")
            ))
            .into());
        }

        if self.backend.timeout_seconds == 0 {
            return Err(ParleyError::Config(
                "backend.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.backend.streaming.command.trim().is_empty() {
            return Err(ParleyError::Config(
                "backend.streaming.command cannot be empty".to_string(),
            )
            .into());
        }

        if self.backend.direct.api_base.trim().is_empty() {
            return Err(ParleyError::Config(
                "backend.direct.api_base cannot be empty".to_string(),
            )
            .into());
        }

        if self.backend.direct.max_tokens == 0 || self.backend.direct.max_tokens > 100_000 {
            return Err(ParleyError::Config(
                "backend.direct.max_tokens must be between 1 and 100000".to_string(),
            )
            .into());
        }

        if self.backend.direct.history_turns == 0 {
            return Err(ParleyError::Config(
                "backend.direct.history_turns must be greater than 0".to_string(),
            )
            .into());
        }

        self.resilience.streaming.validate("streaming")?;
        self.resilience.direct.validate("direct")?;

        if self.session.title_max_chars == 0 {
            return Err(ParleyError::Config(
                "session.title_max_chars must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.max_prompt_chars == 0 {
            return Err(ParleyError::Config(
                "session.max_prompt_chars must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Whether `name` (or the configured default when `None`) selects the
    /// streaming adapter
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Config` for an unknown backend name
    pub fn use_streaming(&self, name: Option<&str>) -> Result<bool> {
        let name = name.unwrap_or(&self.backend.default).to_lowercase();
        match name.as_str() {
            "streaming" => Ok(true),
            "direct" => Ok(false),
            other => Err(ParleyError::Config(format!(
                "Invalid backend: {}. Must be one of: {}",
                other,
                BACKEND_NAMES.join(", ")
            ))
            .into()),
        }
    }
}
