//! Streaming backend event shapes and reply folding
//!
//! A streaming backend emits a sequence of heterogeneous events. Some arrive
//! as typed result records, most as untyped JSON maps, and a few as plain
//! text lines. All of them are parsed once into [`StreamEvent`] through the
//! same field extraction, so nothing downstream has to care which shape an
//! event came in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::BackendReply;
use crate::session::{Metadata, ERROR_MARKER, NO_RESPONSE};

/// Typed result record, as delivered by SDK-style event sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkResultMessage {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One event in whichever shape it arrived
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Typed record with named fields
    Record(SdkResultMessage),
    /// Untyped JSON map
    Map(Map<String, Value>),
    /// Anything that was not a JSON object
    Text(String),
}

impl RawEvent {
    /// Parse one line of backend output
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::backend::events::RawEvent;
    ///
    /// assert!(matches!(RawEvent::from_line(r#"{"type":"system"}"#), RawEvent::Map(_)));
    /// assert!(matches!(RawEvent::from_line("plain text"), RawEvent::Text(_)));
    /// ```
    pub fn from_line(line: &str) -> RawEvent {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => RawEvent::Map(map),
            _ => RawEvent::Text(line.to_string()),
        }
    }

    /// Field view shared by both structured shapes
    fn fields(&self) -> Option<Map<String, Value>> {
        match self {
            RawEvent::Map(map) => Some(map.clone()),
            RawEvent::Record(record) => match serde_json::to_value(record) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            },
            RawEvent::Text(_) => None,
        }
    }

    /// Text rendering used when no result event arrives
    pub fn to_display_string(&self) -> String {
        match self {
            RawEvent::Text(text) => text.clone(),
            RawEvent::Map(map) => Value::Object(map.clone()).to_string(),
            RawEvent::Record(record) => {
                serde_json::to_string(record).unwrap_or_else(|_| format!("{:?}", record))
            }
        }
    }
}

impl From<SdkResultMessage> for RawEvent {
    fn from(record: SdkResultMessage) -> Self {
        RawEvent::Record(record)
    }
}

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => RawEvent::Map(map),
            Value::String(s) => RawEvent::Text(s),
            other => RawEvent::Text(other.to_string()),
        }
    }
}

/// Fields extracted from a discriminated result event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultEvent {
    pub text: String,
    pub is_error: bool,
    pub error: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub session_id: Option<String>,
}

/// An event after parsing
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Final result of the exchange
    Result(ResultEvent),
    /// Progress or bookkeeping event
    Other {
        kind: Option<String>,
        session_id: Option<String>,
    },
}

impl StreamEvent {
    /// Parse a raw event, whatever its shape
    pub fn parse(raw: &RawEvent) -> StreamEvent {
        let Some(fields) = raw.fields() else {
            return StreamEvent::Other {
                kind: None,
                session_id: None,
            };
        };

        let kind = str_field(&fields, "type");
        let subtype = str_field(&fields, "subtype");
        let session_id = str_field(&fields, "session_id");
        let is_result =
            subtype.as_deref() == Some("success") || kind.as_deref() == Some("result");
        if !is_result {
            return StreamEvent::Other { kind, session_id };
        }

        let usage = fields.get("usage").and_then(Value::as_object);
        let token = |name: &str| {
            usage
                .and_then(|u| u.get(name))
                .or_else(|| fields.get(name))
                .and_then(Value::as_u64)
        };
        let is_error = fields
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let text = str_field(&fields, "result").unwrap_or_default();
        let error = if is_error {
            str_field(&fields, "error")
                .or_else(|| (!text.is_empty()).then(|| text.clone()))
                .or_else(|| Some("Unknown error".to_string()))
        } else {
            None
        };

        StreamEvent::Result(ResultEvent {
            text,
            is_error,
            error,
            input_tokens: token("input_tokens"),
            output_tokens: token("output_tokens"),
            cost_usd: fields
                .get("total_cost_usd")
                .or_else(|| fields.get("cost_usd"))
                .and_then(Value::as_f64),
            duration_ms: fields.get("duration_ms").and_then(Value::as_u64),
            num_turns: fields.get("num_turns").and_then(Value::as_u64),
            session_id,
        })
    }

    /// Correlation token carried by the event, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Result(result) => result.session_id.as_deref(),
            StreamEvent::Other { session_id, .. } => session_id.as_deref(),
        }
    }
}

/// Accumulates events into a single reply
#[derive(Debug, Default)]
pub struct EventFolder {
    result: Option<ResultEvent>,
    last: Option<RawEvent>,
    correlation: Option<String>,
    count: usize,
}

impl EventFolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one event; returns its parsed form
    pub fn push(&mut self, raw: RawEvent) -> StreamEvent {
        let event = StreamEvent::parse(&raw);
        if let Some(id) = event.session_id() {
            self.correlation = Some(id.to_string());
        }
        if let StreamEvent::Result(result) = &event {
            self.result = Some(result.clone());
        }
        self.last = Some(raw);
        self.count += 1;
        event
    }

    /// True once a discriminated result event has been seen
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// Number of events seen so far
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Build the reply
    ///
    /// The last result event wins. Without one the last event is rendered
    /// as text, and an empty stream yields the "no response" placeholder.
    pub fn finish(self) -> BackendReply {
        let correlation = self.correlation;
        match (self.result, self.last) {
            (Some(result), _) => reply_from_result(result, correlation),
            (None, Some(last)) => {
                tracing::debug!("Stream ended without a result event, using last event");
                let text = last.to_display_string();
                BackendReply {
                    text: if text.trim().is_empty() {
                        NO_RESPONSE.to_string()
                    } else {
                        text
                    },
                    metadata: Metadata::new(),
                    new_correlation: correlation,
                    error: None,
                }
            }
            (None, None) => BackendReply {
                text: NO_RESPONSE.to_string(),
                metadata: Metadata::new(),
                new_correlation: None,
                error: None,
            },
        }
    }
}

/// Fold a complete list of events into a reply
///
/// # Examples
///
/// ```
/// use parley::backend::events::{fold_events, RawEvent};
/// use serde_json::json;
///
/// let reply = fold_events(vec![RawEvent::from(json!({
///     "type": "result", "result": "hi", "session_id": "abc"
/// }))]);
/// assert_eq!(reply.text, "hi");
/// assert_eq!(reply.new_correlation.as_deref(), Some("abc"));
/// ```
pub fn fold_events<I>(events: I) -> BackendReply
where
    I: IntoIterator<Item = RawEvent>,
{
    let mut folder = EventFolder::new();
    for event in events {
        folder.push(event);
    }
    folder.finish()
}

fn reply_from_result(result: ResultEvent, correlation: Option<String>) -> BackendReply {
    let mut metadata = Metadata::new();
    if let Some(cost) = result.cost_usd {
        metadata.insert("cost_usd".into(), Value::from(cost));
    }
    if let Some(duration) = result.duration_ms {
        metadata.insert("duration_ms".into(), Value::from(duration));
    }
    if let Some(turns) = result.num_turns {
        metadata.insert("num_turns".into(), Value::from(turns));
    }
    if let Some(tokens) = result.input_tokens {
        metadata.insert("input_tokens".into(), Value::from(tokens));
    }
    if let Some(tokens) = result.output_tokens {
        metadata.insert("output_tokens".into(), Value::from(tokens));
    }
    if let Some(id) = &correlation {
        metadata.insert("session_id".into(), Value::from(id.clone()));
    }

    if result.is_error {
        let error = result.error.unwrap_or_else(|| "Unknown error".to_string());
        metadata.insert("is_error".into(), Value::Bool(true));
        return BackendReply {
            text: format!("{} {}", ERROR_MARKER, error),
            metadata,
            new_correlation: correlation,
            error: Some(error),
        };
    }

    BackendReply {
        text: if result.text.trim().is_empty() {
            NO_RESPONSE.to_string()
        } else {
            result.text
        },
        metadata,
        new_correlation: correlation,
        error: None,
    }
}

fn str_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_record() -> SdkResultMessage {
        SdkResultMessage {
            subtype: Some("success".into()),
            result: Some("typed answer".into()),
            usage: Some(json!({"input_tokens": 12, "output_tokens": 34})),
            total_cost_usd: Some(0.02),
            duration_ms: Some(1500),
            num_turns: Some(2),
            session_id: Some("sess-typed".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_typed_and_map_shapes_parse_identically() {
        let record = success_record();
        let map = serde_json::to_value(&record).unwrap();
        let from_record = StreamEvent::parse(&RawEvent::Record(record));
        let from_map = StreamEvent::parse(&RawEvent::from(map));
        assert_eq!(from_record, from_map);
        match from_record {
            StreamEvent::Result(r) => {
                assert_eq!(r.text, "typed answer");
                assert_eq!(r.input_tokens, Some(12));
                assert_eq!(r.output_tokens, Some(34));
                assert_eq!(r.cost_usd, Some(0.02));
                assert_eq!(r.num_turns, Some(2));
            }
            other => panic!("expected result event, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_usage_and_cost_alias() {
        let event = StreamEvent::parse(&RawEvent::from(json!({
            "type": "result",
            "result": "ok",
            "input_tokens": 5,
            "output_tokens": 6,
            "cost_usd": 0.5
        })));
        match event {
            StreamEvent::Result(r) => {
                assert_eq!(r.input_tokens, Some(5));
                assert_eq!(r.output_tokens, Some(6));
                assert_eq!(r.cost_usd, Some(0.5));
                assert!(r.duration_ms.is_none());
            }
            other => panic!("expected result event, got {:?}", other),
        }
    }

    #[test]
    fn test_error_result_yields_marker_and_error() {
        let reply = fold_events(vec![RawEvent::from(json!({
            "type": "result",
            "is_error": true,
            "error": "boom"
        }))]);
        assert!(reply.text.starts_with(ERROR_MARKER));
        assert_eq!(reply.error.as_deref(), Some("boom"));
        assert_eq!(reply.metadata.get("is_error"), Some(&json!(true)));
    }

    #[test]
    fn test_no_result_falls_back_to_last_event() {
        let reply = fold_events(vec![
            RawEvent::from(json!({"type": "system", "session_id": "s-1"})),
            RawEvent::from_line("partial output"),
        ]);
        assert_eq!(reply.text, "partial output");
        assert_eq!(reply.new_correlation.as_deref(), Some("s-1"));
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_last_map_event_is_stringified() {
        let reply = fold_events(vec![RawEvent::from(json!({"type": "assistant"}))]);
        assert_eq!(reply.text, r#"{"type":"assistant"}"#);
    }

    #[test]
    fn test_empty_stream_yields_placeholder() {
        let reply = fold_events(Vec::new());
        assert_eq!(reply.text, NO_RESPONSE);
        assert!(reply.metadata.is_empty());
        assert!(reply.new_correlation.is_none());
    }

    #[test]
    fn test_last_session_id_wins() {
        let reply = fold_events(vec![
            RawEvent::from(json!({"type": "system", "subtype": "init", "session_id": "first"})),
            RawEvent::from(json!({"type": "result", "result": "r", "session_id": "second"})),
        ]);
        assert_eq!(reply.new_correlation.as_deref(), Some("second"));
        assert_eq!(reply.metadata.get("session_id"), Some(&json!("second")));
    }

    #[test]
    fn test_unreported_fields_are_absent_not_zero() {
        let reply = fold_events(vec![RawEvent::from(json!({"type": "result", "result": "r"}))]);
        assert!(!reply.metadata.contains_key("cost_usd"));
        assert!(!reply.metadata.contains_key("input_tokens"));
    }

    #[test]
    fn test_non_object_lines_are_text() {
        assert_eq!(RawEvent::from_line("[1,2]"), RawEvent::Text("[1,2]".into()));
        assert_eq!(
            StreamEvent::parse(&RawEvent::Text("x".into())),
            StreamEvent::Other {
                kind: None,
                session_id: None
            }
        );
    }
}
