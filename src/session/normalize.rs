//! Coercion of arbitrary session input into canonical entities
//!
//! Everything that enters the session store passes through here: values
//! already typed as [`Session`], JSON maps read from disk or handed over by a
//! front end, and outright garbage. None of these functions fail. Missing or
//! malformed fields are defaulted, unknown keys are dropped, and any
//! timestamp that cannot be understood is replaced by "now".
//!
//! Normalization is idempotent: feeding a result back in yields an equal
//! value.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use super::types::{
    new_id, now_timestamp, Message, Metadata, Role, Session, NO_RESPONSE, UNTITLED,
};

/// Epoch values at or above this magnitude are read as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Years outside this range do not survive a format/parse cycle
const CANONICAL_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Session input in either of the shapes the store accepts
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Already typed; only timestamps are re-validated
    Canonical(Session),
    /// Untyped JSON, possibly malformed
    Raw(Value),
}

impl From<Session> for SessionInput {
    fn from(session: Session) -> Self {
        SessionInput::Canonical(session)
    }
}

impl From<Value> for SessionInput {
    fn from(value: Value) -> Self {
        SessionInput::Raw(value)
    }
}

/// Message input in either of the shapes the store accepts
#[derive(Debug, Clone, PartialEq)]
pub enum MessageInput {
    /// Already typed; only the timestamp is re-validated
    Canonical(Message),
    /// Untyped JSON, possibly malformed
    Raw(Value),
}

impl From<Message> for MessageInput {
    fn from(message: Message) -> Self {
        MessageInput::Canonical(message)
    }
}

impl From<Value> for MessageInput {
    fn from(value: Value) -> Self {
        MessageInput::Raw(value)
    }
}

/// Normalize any session input into a canonical [`Session`]
///
/// # Examples
///
/// ```
/// use parley::session::{normalize_session, UNTITLED};
/// use serde_json::json;
///
/// let session = normalize_session(json!({"title": "t", "bogus": 1}));
/// assert_eq!(session.title, "t");
///
/// let fresh = normalize_session(serde_json::Value::Null);
/// assert_eq!(fresh.title, UNTITLED);
/// assert!(fresh.messages.is_empty());
/// ```
pub fn normalize_session(input: impl Into<SessionInput>) -> Session {
    match input.into() {
        SessionInput::Canonical(session) => normalize_typed_session(session),
        SessionInput::Raw(Value::Object(map)) => normalize_session_map(&map),
        SessionInput::Raw(other) => {
            tracing::debug!(kind = value_kind(&other), "Replacing non-map session input");
            Session::new(UNTITLED)
        }
    }
}

/// Normalize any message input into a canonical [`Message`]
///
/// A non-map raw value becomes a user message with a fresh id. Content may
/// only be empty while the message is in progress; a finished empty message
/// carries [`NO_RESPONSE`] instead.
pub fn normalize_message(input: impl Into<MessageInput>) -> Message {
    let mut message = match input.into() {
        MessageInput::Canonical(mut message) => {
            message.timestamp = canonical_timestamp_str(&message.timestamp);
            message
        }
        MessageInput::Raw(Value::Object(map)) => normalize_message_map(&map),
        MessageInput::Raw(_) => Message::user(String::new()),
    };
    fill_empty_content(&mut message);
    message
}

/// Convert a raw timestamp value into a canonical ISO-8601 UTC string
///
/// Accepts RFC 3339 strings, naive ISO date-times (read as UTC), bare dates
/// and epoch numbers in seconds or milliseconds. Anything else, including
/// dates outside years 1 to 9999, yields the current time.
pub fn canonical_timestamp(value: &Value) -> String {
    let parsed = match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    };
    parsed
        .map(format_timestamp)
        .unwrap_or_else(now_timestamp)
}

/// String-only form of [`canonical_timestamp`]
pub fn canonical_timestamp_str(value: &str) -> String {
    parse_timestamp_str(value)
        .map(format_timestamp)
        .unwrap_or_else(now_timestamp)
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_any_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    s.parse::<f64>().ok().and_then(from_epoch)
}

fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    parse_any_timestamp(raw).filter(|dt| CANONICAL_YEARS.contains(&dt.year()))
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .filter(|dt| CANONICAL_YEARS.contains(&dt.year()))
}

fn normalize_typed_session(mut session: Session) -> Session {
    session.created_at = canonical_timestamp_str(&session.created_at);
    session.last_activity = canonical_timestamp_str(&session.last_activity);
    session.messages = session
        .messages
        .into_iter()
        .map(|m| normalize_message(MessageInput::Canonical(m)))
        .collect();
    keep_single_in_progress(&mut session.messages);
    session.messages.iter_mut().for_each(fill_empty_content);
    session
}

fn normalize_session_map(map: &serde_json::Map<String, Value>) -> Session {
    let created_at = canonical_timestamp(map.get("created_at").unwrap_or(&Value::Null));
    let last_activity = match map.get("last_activity").or_else(|| map.get("updated_at")) {
        Some(value) if !value.is_null() => canonical_timestamp(value),
        _ => created_at.clone(),
    };

    let mut messages: Vec<Message> = match map.get("messages") {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| normalize_message(MessageInput::Raw(item.clone())))
            .collect(),
        _ => Vec::new(),
    };
    keep_single_in_progress(&mut messages);
    messages.iter_mut().for_each(fill_empty_content);

    Session {
        id: string_field(map, "id").unwrap_or_else(new_id),
        title: string_field(map, "title").unwrap_or_else(|| UNTITLED.to_string()),
        messages,
        created_at,
        last_activity,
        backend_correlation_id: string_field(map, "backend_correlation_id")
            .or_else(|| string_field(map, "claude_session_id")),
        error: string_field(map, "error"),
    }
}

fn normalize_message_map(map: &serde_json::Map<String, Value>) -> Message {
    let role = match map.get("role").and_then(Value::as_str) {
        Some(r) if r.eq_ignore_ascii_case("assistant") => Role::Assistant,
        _ => Role::User,
    };
    let content = match map.get("content") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let metadata = match map.get("metadata") {
        Some(Value::Object(m)) => m.clone(),
        _ => Metadata::new(),
    };
    let in_progress = map
        .get("in_progress")
        .or_else(|| map.get("is_streaming"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Message {
        id: string_field(map, "id").unwrap_or_else(new_id),
        role,
        content,
        timestamp: canonical_timestamp(map.get("timestamp").unwrap_or(&Value::Null)),
        metadata,
        in_progress,
    }
}

/// Non-empty string (or number rendered as string) under `key`
fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// At most one message may be in progress; the latest one keeps the flag.
fn keep_single_in_progress(messages: &mut [Message]) {
    let Some(last) = messages.iter().rposition(|m| m.in_progress) else {
        return;
    };
    for (idx, message) in messages.iter_mut().enumerate() {
        if idx != last && message.in_progress {
            message.in_progress = false;
        }
    }
}

fn fill_empty_content(message: &mut Message) {
    if !message.in_progress && message.content.is_empty() {
        message.content = NO_RESPONSE.to_string();
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_canonical(ts: &str) {
        assert!(ts.contains('T'), "timestamp without T separator: {}", ts);
        assert!(ts.ends_with('Z'), "timestamp not in UTC: {}", ts);
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_canonical_timestamp_rfc3339_with_offset_converts_to_utc() {
        let ts = canonical_timestamp(&json!("2024-03-01T12:00:00+02:00"));
        assert_eq!(ts, "2024-03-01T10:00:00.000000Z");
    }

    #[test]
    fn test_canonical_timestamp_naive_is_utc() {
        let ts = canonical_timestamp(&json!("2024-03-01 12:30:45.123456"));
        assert_eq!(ts, "2024-03-01T12:30:45.123456Z");
    }

    #[test]
    fn test_canonical_timestamp_date_only() {
        let ts = canonical_timestamp(&json!("2024-03-01"));
        assert_eq!(ts, "2024-03-01T00:00:00.000000Z");
    }

    #[test]
    fn test_canonical_timestamp_epoch_seconds_and_millis() {
        let secs = canonical_timestamp(&json!(1_700_000_000));
        let millis = canonical_timestamp(&json!(1_700_000_000_000_i64));
        assert_eq!(secs, "2023-11-14T22:13:20.000000Z");
        assert_eq!(secs, millis);
    }

    #[test]
    fn test_canonical_timestamp_garbage_becomes_now() {
        for value in [json!("yesterday"), json!(null), json!({"a": 1}), json!([1])] {
            assert_canonical(&canonical_timestamp(&value));
        }
    }

    #[test]
    fn test_canonical_timestamp_is_stable() {
        let once = canonical_timestamp(&json!("2024-03-01T10:00:00.123456789Z"));
        let twice = canonical_timestamp_str(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_out_of_range_epoch_becomes_now_and_stays_stable() {
        let session = normalize_session(json!({"created_at": 1e15, "last_activity": -1e15}));
        assert!(!session.created_at.starts_with('+'));
        assert_canonical(&session.created_at);
        assert_canonical(&session.last_activity);

        let twice = normalize_session(session.clone());
        assert_eq!(session, twice);
    }

    #[test]
    fn test_out_of_range_year_string_is_rejected() {
        let ts = canonical_timestamp_str("+33658-09-27T01:46:40.000000Z");
        assert!(!ts.starts_with('+'));
        assert_canonical(&ts);
    }

    #[test]
    fn test_finished_empty_message_gets_no_response_text() {
        let msg = normalize_message(json!({"role": "assistant", "content": "", "in_progress": false}));
        assert_eq!(msg.content, NO_RESPONSE);
        assert!(!msg.in_progress);

        let mut typed = Message::assistant(String::new());
        typed.in_progress = false;
        assert_eq!(normalize_message(typed).content, NO_RESPONSE);

        let pending = normalize_message(json!({"role": "assistant", "in_progress": true}));
        assert!(pending.content.is_empty());
    }

    #[test]
    fn test_demoted_in_progress_message_is_filled() {
        let session = normalize_session(json!({
            "messages": [
                {"role": "assistant", "in_progress": true},
                {"role": "assistant", "in_progress": true}
            ]
        }));
        assert_eq!(session.messages[0].content, NO_RESPONSE);
        assert!(session.messages[1].content.is_empty());
        assert_eq!(normalize_session(session.clone()), session);
    }

    #[test]
    fn test_raw_map_defaults_and_drops_unknown_keys() {
        let session = normalize_session(json!({
            "messages": [{"role": "assistant", "content": "hi", "extra": true}],
            "unexpected": "dropped"
        }));
        assert!(!session.id.is_empty());
        assert_eq!(session.title, UNTITLED);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::Assistant);
        assert_eq!(session.messages[0].content, "hi");
        assert_canonical(&session.created_at);
        assert_eq!(session.created_at, session.last_activity);
    }

    #[test]
    fn test_raw_message_coercions() {
        let msg = normalize_message(json!({
            "role": "system",
            "content": {"parts": ["a"]},
            "metadata": "not a map",
            "timestamp": 1_700_000_000
        }));
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, r#"{"parts":["a"]}"#);
        assert!(msg.metadata.is_empty());
        assert_eq!(msg.timestamp, "2023-11-14T22:13:20.000000Z");
    }

    #[test]
    fn test_legacy_aliases_are_accepted() {
        let session = normalize_session(json!({
            "id": "s1",
            "claude_session_id": "corr-1",
            "updated_at": "2024-01-02T03:04:05Z",
            "messages": [{"role": "assistant", "content": "", "is_streaming": true}]
        }));
        assert_eq!(session.backend_correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(session.last_activity, "2024-01-02T03:04:05.000000Z");
        assert!(session.messages[0].in_progress);
    }

    #[test]
    fn test_only_last_in_progress_message_keeps_flag() {
        let session = normalize_session(json!({
            "messages": [
                {"role": "assistant", "in_progress": true},
                {"role": "user", "content": "q"},
                {"role": "assistant", "in_progress": true}
            ]
        }));
        let flags: Vec<bool> = session.messages.iter().map(|m| m.in_progress).collect();
        assert_eq!(flags, vec![false, false, true]);
    }

    #[test]
    fn test_non_map_messages_are_skipped() {
        let session = normalize_session(json!({"messages": ["junk", 3, {"content": "ok"}]}));
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "ok");
    }

    #[test]
    fn test_non_map_input_yields_fresh_session() {
        for value in [json!(null), json!(42), json!("s"), json!([1, 2])] {
            let session = normalize_session(value);
            assert_eq!(session.title, UNTITLED);
            assert!(session.messages.is_empty());
        }
    }

    #[test]
    fn test_canonical_input_only_revalidates_timestamps() {
        let mut session = Session::new("kept");
        session.created_at = "not a date".to_string();
        session.last_activity = "2024-05-05T05:05:05Z".to_string();
        session.messages.push(Message::user("x"));
        session.error = Some("e".into());

        let normalized = normalize_session(session.clone());
        assert_eq!(normalized.id, session.id);
        assert_eq!(normalized.title, "kept");
        assert_eq!(normalized.error.as_deref(), Some("e"));
        assert_canonical(&normalized.created_at);
        assert_eq!(normalized.last_activity, "2024-05-05T05:05:05.000000Z");
    }

    #[test]
    fn test_idempotence_for_every_input_kind() {
        let inputs: Vec<SessionInput> = vec![
            Session::new("typed").into(),
            json!({
                "id": "raw",
                "title": "from map",
                "created_at": "2024-01-01 00:00:00",
                "messages": [{"role": "user", "content": "hey", "timestamp": 1_700_000_000}]
            })
            .into(),
            json!(null).into(),
        ];
        for input in inputs {
            let once = normalize_session(input);
            let twice = normalize_session(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_json_round_trip_preserves_fields() {
        let session = normalize_session(json!({
            "title": "t",
            "messages": [{"role": "assistant", "content": "a", "metadata": {"cost_usd": 0.1}}]
        }));
        let encoded = serde_json::to_string(&session).unwrap();
        let decoded: Session = serde_json::from_str(&encoded).unwrap();
        assert_eq!(session, decoded);
        assert_canonical(&decoded.messages[0].timestamp);
    }
}
