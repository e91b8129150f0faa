//! Streaming backend adapter driving a child process
//!
//! The adapter spawns the configured command once per call:
//!
//! ```text
//! <command> <args...> --max-turns <N> [<resume_flag> <correlation>] <prompt>
//! ```
//!
//! Each stdout line is one event (usually a JSON object). Events are folded
//! into a single reply by [`EventFolder`]. Stderr is drained alongside stdout
//! in the same future and only used to classify a failed exit. Output that is
//! not valid UTF-8 is decoded lossily rather than aborting the call.

use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;

use super::events::{EventFolder, RawEvent, StreamEvent};
use super::{AdapterKind, BackendAdapter, BackendReply, BackendRequest};
use crate::config::StreamingConfig;
use crate::error::{ParleyError, Result};
use crate::session::Metadata;

/// Longest stderr excerpt carried in an error message
const STDERR_EXCERPT_CHARS: usize = 2000;

fn auth_failure_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)(not\s+(logged\s+in|authenticated)|auth(entication)?\s+(required|failed)|invalid\s+api\s+key|please\s+(run\s+\S+\s+)?(auth\s+)?login|usage\s+limit)",
            )
            .ok()
        })
        .as_ref()
}

/// Adapter for a stream-json emitting CLI
#[derive(Debug, Clone)]
pub struct StreamingAdapter {
    config: StreamingConfig,
}

impl StreamingAdapter {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    /// Arguments for one invocation, after the command itself
    pub fn build_args(&self, request: &BackendRequest) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.push("--max-turns".to_string());
        args.push(self.config.max_turns.to_string());
        if let Some(correlation) = request.correlation.as_deref().filter(|c| !c.is_empty()) {
            args.push(self.config.resume_flag.clone());
            args.push(correlation.to_string());
        }
        args.push(request.prompt.clone());
        args
    }

    async fn run(&self, request: &BackendRequest) -> Result<BackendReply> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(self.build_args(request));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ParleyError::BackendNotFound(self.config.command.clone())
            } else {
                ParleyError::Backend(format!(
                    "failed to spawn `{}`: {}",
                    self.config.command, e
                ))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParleyError::Backend("child stdout unavailable after spawn".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ParleyError::Backend("child stderr unavailable after spawn".into()))?;

        let read_stdout = async {
            let mut folder = EventFolder::new();
            let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'));
            while let Some(line) = lines.next().await {
                let bytes = line.map_err(|e| {
                    ParleyError::Backend(format!("reading backend output: {}", e))
                })?;
                let line = String::from_utf8_lossy(&bytes);
                if line.trim().is_empty() {
                    continue;
                }
                match folder.push(RawEvent::from_line(&line)) {
                    StreamEvent::Result(result) => {
                        tracing::debug!(is_error = result.is_error, "Backend result event")
                    }
                    StreamEvent::Other { kind, .. } => {
                        tracing::trace!(kind = ?kind, "Backend event")
                    }
                }
            }
            Ok::<_, ParleyError>(folder)
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                tracing::warn!("Failed to read backend stderr: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        };

        let (folder, stderr_text) = tokio::join!(read_stdout, read_stderr);
        let folder = folder?;
        let status = child.wait().await?;

        if !status.success() {
            if !folder.has_result() {
                return Err(classify_exit(status.code(), &stderr_text).into());
            }
            tracing::warn!(
                code = ?status.code(),
                "Backend exited unsuccessfully after a result event, keeping the result"
            );
        }

        if !stderr_text.trim().is_empty() {
            tracing::debug!("Backend stderr: {}", excerpt(&stderr_text));
        }
        tracing::debug!(events = folder.len(), "Backend stream finished");
        Ok(folder.finish())
    }
}

#[async_trait]
impl BackendAdapter for StreamingAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Streaming
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendReply> {
        self.run(request).await
    }

    fn remediate(&self, error: &anyhow::Error) -> Option<BackendReply> {
        remediation_for(&self.config.command, error)
    }
}

fn classify_exit(code: Option<i32>, stderr: &str) -> ParleyError {
    let message = excerpt(stderr);
    if auth_failure_pattern()
        .map(|re| re.is_match(stderr))
        .unwrap_or(false)
    {
        return ParleyError::Authentication(message);
    }
    ParleyError::CommandFailed {
        code,
        message: if message.is_empty() {
            "process exited without output".to_string()
        } else {
            message
        },
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= STDERR_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(STDERR_EXCERPT_CHARS).collect();
        format!("{}...", cut)
    }
}

/// User-facing reply for a failed streaming call
///
/// Breaker rejections and timeouts are not remediated; the caller shows
/// those itself.
pub fn remediation_for(command: &str, error: &anyhow::Error) -> Option<BackendReply> {
    let typed = error.downcast_ref::<ParleyError>();
    let (text, needs_setup) = match typed {
        Some(ParleyError::CircuitOpen { .. }) | Some(ParleyError::Timeout { .. }) => return None,
        Some(ParleyError::Authentication(_)) => (
            format!(
                "**The streaming backend is not authenticated, or its usage limit was reached**\n\n\
                 How to fix:\n\
                 1. Run `{command} auth login` in a terminal\n\
                 2. Follow the login instructions\n\
                 3. If you are already logged in, wait for the usage limit to reset\n\n\
                 Alternative: switch to the direct backend."
            ),
            true,
        ),
        Some(ParleyError::BackendNotFound(_)) => (
            format!(
                "**`{command}` was not found**\n\n\
                 The streaming backend CLI is not installed or not on PATH.\n\n\
                 How to install:\n\
                 1. Run `npm install -g @anthropic-ai/claude-code`\n\
                 2. Run `{command} auth login`\n\n\
                 Alternative: switch to the direct backend."
            ),
            true,
        ),
        Some(ParleyError::CommandFailed { .. }) => (
            format!(
                "**The backend command failed**\n\nError: {}\n\n\
                 Try the direct backend as an alternative.",
                error
            ),
            false,
        ),
        _ => (format!("Error calling the streaming backend: {:#}", error), false),
    };

    let mut metadata = Metadata::new();
    metadata.insert("is_error".into(), Value::Bool(true));
    if needs_setup {
        metadata.insert("needs_setup".into(), Value::Bool(true));
    }
    Some(BackendReply {
        text,
        metadata,
        new_correlation: None,
        error: Some(error.to_string()),
    })
}
