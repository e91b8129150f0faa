//! Canonical session entities
//!
//! Values of these types are what the normalizer produces. Every timestamp
//! is held as an ISO-8601 UTC string so that a session can always be written
//! to the JSON document without further conversion.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Title given to a session before its first successful reply
pub const UNTITLED: &str = "untitled";

/// Content used when a backend produced no text at all
pub const NO_RESPONSE: &str = "No response received.";

/// Prefix of assistant content produced from a backend-reported error
pub const ERROR_MARKER: &str = "Error:";

/// Open string-keyed map of reply annotations (tokens, cost, turns)
///
/// Absent keys mean "not reported", never zero.
pub type Metadata = serde_json::Map<String, Value>;

/// Current time as a canonical timestamp string
///
/// # Examples
///
/// ```
/// use parley::session::now_timestamp;
///
/// let ts = now_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with('Z'));
/// ```
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Generate a fresh opaque identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Text typed by the person chatting
    User,
    /// Text produced by a backend
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque unique identifier
    pub id: String,
    /// Author of the message
    pub role: Role,
    /// Message text; empty only while `in_progress` is set
    pub content: String,
    /// Canonical ISO-8601 UTC timestamp
    pub timestamp: String,
    /// Reply annotations reported by the backend
    #[serde(default)]
    pub metadata: Metadata,
    /// True while a backend is still producing this message
    #[serde(default)]
    pub in_progress: bool,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: now_timestamp(),
            metadata: Metadata::new(),
            in_progress: false,
        }
    }

    /// Creates a completed user message
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::session::{Message, Role};
    ///
    /// let msg = Message::user("hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert!(!msg.in_progress);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a completed assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates the empty assistant message shown while a send is running
    pub fn placeholder() -> Self {
        Self {
            in_progress: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }
}

/// One conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Store key, stable for the conversation's lifetime
    pub id: String,
    /// Display title, `UNTITLED` until the first successful reply
    pub title: String,
    /// Messages in insertion order
    pub messages: Vec<Message>,
    /// Canonical creation timestamp
    pub created_at: String,
    /// Canonical timestamp of the last successful completion
    pub last_activity: String,
    /// Token a stateful backend uses to resume this conversation
    #[serde(default)]
    pub backend_correlation_id: Option<String>,
    /// User-visible error from the most recent send, if it failed
    #[serde(default)]
    pub error: Option<String>,
}

impl Session {
    /// Creates an empty session; an empty title becomes `UNTITLED`
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let now = now_timestamp();
        Self {
            id: new_id(),
            title: if title.trim().is_empty() {
                UNTITLED.to_string()
            } else {
                title
            },
            messages: Vec::new(),
            created_at: now.clone(),
            last_activity: now,
            backend_correlation_id: None,
            error: None,
        }
    }

    /// True when the last message is still being produced
    pub fn has_pending_reply(&self) -> bool {
        self.messages.last().map(|m| m.in_progress).unwrap_or(false)
    }

    /// True while the title is still the default sentinel
    pub fn is_untitled(&self) -> bool {
        self.title == UNTITLED
    }

    /// First user message, used to derive the automatic title
    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }
}

/// Ephemeral progress annotation for a running send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    /// Short machine-readable step kind (e.g. "backend_call")
    pub kind: String,
    /// Human-readable description
    pub message: String,
    /// Canonical timestamp when the step started
    pub timestamp: String,
}

impl ProcessingStep {
    /// Creates a step stamped with the current time
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            timestamp: now_timestamp(),
        }
    }
}

/// Derive an automatic title from the first user message
///
/// The text is cut to `max_chars` characters with `"..."` appended when it
/// was longer.
///
/// # Examples
///
/// ```
/// use parley::session::title_from_prompt;
///
/// assert_eq!(title_from_prompt("hello", 50), "hello");
/// assert_eq!(title_from_prompt("abcdef", 3), "abc...");
/// ```
pub fn title_from_prompt(prompt: &str, max_chars: usize) -> String {
    let trimmed = prompt.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
