//! Direct one-shot backend adapter
//!
//! Sends the recent conversation plus the new prompt to a messages-style
//! completion endpoint and returns the single completion. The adapter is
//! stateless: it ignores correlation tokens and never returns one.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AdapterKind, BackendAdapter, BackendReply, BackendRequest};
use crate::config::DirectConfig;
use crate::error::{ParleyError, Result};
use crate::session::{Message, Metadata, NO_RESPONSE};

const API_VERSION: &str = "2023-06-01";

/// Tokens per word used when the backend does not report usage
const TOKENS_PER_WORD: f64 = 1.3;

/// USD per 1K tokens (input, output), matched by model family
const RATE_TABLE: &[(&str, f64, f64)] = &[
    ("opus", 0.015, 0.075),
    ("sonnet", 0.003, 0.015),
    ("haiku", 0.00025, 0.00125),
];

const DEFAULT_RATE: (f64, f64) = (0.003, 0.015);

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// Direct HTTPS completion adapter
///
/// # Examples
///
/// ```no_run
/// use parley::backend::{BackendAdapter, BackendRequest, DirectAdapter};
/// use parley::config::DirectConfig;
///
/// # async fn example() -> parley::error::Result<()> {
/// let adapter = DirectAdapter::new(DirectConfig::default())?;
/// let reply = adapter.send(&BackendRequest::new("Hello!")).await?;
/// println!("{}", reply.text);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DirectAdapter {
    client: Client,
    config: DirectConfig,
    api_key: Option<String>,
}

impl DirectAdapter {
    /// Creates the adapter, reading the API key from `config.api_key_env`
    ///
    /// A missing key is not an error here; sends fail with
    /// `ParleyError::Authentication` until one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: DirectConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    /// Creates the adapter with an explicit API key
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn with_api_key(config: DirectConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ParleyError::Backend(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            "Initialized direct backend: api_base={}, model={}",
            config.api_base,
            config.model
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.api_base.trim_end_matches('/'))
    }

    /// The most recent `history_turns` exchanges, skipping empty and
    /// unfinished messages
    pub fn truncate_history<'a>(&self, history: &'a [Message]) -> Vec<&'a Message> {
        let usable: Vec<&Message> = history
            .iter()
            .filter(|m| !m.in_progress && !m.content.trim().is_empty())
            .collect();
        let keep = self.config.history_turns.saturating_mul(2);
        let skip = usable.len().saturating_sub(keep);
        usable.into_iter().skip(skip).collect()
    }
}

#[async_trait]
impl BackendAdapter for DirectAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Direct
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendReply> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ParleyError::Authentication(format!("{} is not set", self.config.api_key_env))
        })?;

        if request.correlation.is_some() {
            tracing::trace!("Direct backend ignores correlation token");
        }

        let mut messages: Vec<ApiMessage<'_>> = self
            .truncate_history(&request.history)
            .into_iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        messages.push(ApiMessage {
            role: "user",
            content: &request.prompt,
        });
        let estimated_input = messages.iter().map(|m| estimate_tokens(m.content)).sum::<u64>();

        let body = ApiRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Direct backend request failed: {}", e);
                ParleyError::Backend(format!("Request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Direct backend returned error {}: {}", status, error_text);
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ParleyError::Authentication(format!(
                    "API rejected credentials ({}): {}",
                    status, error_text
                ))
                .into());
            }
            return Err(ParleyError::Backend(format!(
                "API returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            ParleyError::Backend(format!("Failed to parse completion response: {}", e))
        })?;
        let duration = started.elapsed();

        let text = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text" || block.kind.is_empty())
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let reported = parsed
            .usage
            .as_ref()
            .and_then(|u| Some((u.input_tokens?, u.output_tokens?)));
        let (input_tokens, output_tokens, estimated) = match reported {
            Some((input, output)) => (input, output, false),
            None => (estimated_input, estimate_tokens(&text), true),
        };

        let model = parsed.model.unwrap_or_else(|| self.config.model.clone());
        let metadata = usage_metadata(&model, input_tokens, output_tokens, estimated, duration);
        tracing::debug!(
            input_tokens,
            output_tokens,
            estimated,
            "Direct backend completion received"
        );

        Ok(BackendReply {
            text: if text.trim().is_empty() {
                NO_RESPONSE.to_string()
            } else {
                text
            },
            metadata,
            new_correlation: None,
            error: None,
        })
    }
}

/// Approximate token count from whitespace-separated words
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * TOKENS_PER_WORD) as u64
}

/// Input and output USD rates per 1K tokens for `model`
pub fn rates_for(model: &str) -> (f64, f64) {
    let lower = model.to_lowercase();
    RATE_TABLE
        .iter()
        .find(|(family, _, _)| lower.contains(family))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_RATE)
}

/// Approximate cost in USD
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (input_rate, output_rate) = rates_for(model);
    (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1000.0
}

fn usage_metadata(
    model: &str,
    input_tokens: u64,
    output_tokens: u64,
    estimated: bool,
    duration: Duration,
) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("model".into(), Value::from(model));
    metadata.insert("input_tokens".into(), Value::from(input_tokens));
    metadata.insert("output_tokens".into(), Value::from(output_tokens));
    metadata.insert(
        "cost_usd".into(),
        Value::from(estimate_cost(model, input_tokens, output_tokens)),
    );
    metadata.insert("duration_ms".into(), Value::from(duration.as_millis() as u64));
    if estimated {
        metadata.insert("estimated_usage".into(), Value::Bool(true));
    }
    metadata
}
