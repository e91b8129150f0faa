#![cfg(unix)]

mod common;

use std::sync::Arc;

use common::{quick_backend, StubAdapter};
use parley::backend::{AdapterKind, Backends, StreamingAdapter};
use parley::config::{SessionConfig, StreamingConfig};
use parley::{ChatService, SessionStore};

/// A fake stream-json CLI: echoes the resume token it was given and always
/// hands out the same correlation id
const FAKE_CLI: &str = r#"
resume=none
prev=""
for arg in "$@"; do
  if [ "$prev" = "--resume" ]; then resume="$arg"; fi
  prev="$arg"
done
echo '{"type":"system","subtype":"init","session_id":"corr-42"}'
echo "{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"resume=$resume\",\"usage\":{\"input_tokens\":3,\"output_tokens\":4},\"num_turns\":1}"
"#;

fn service_running(script: &str, command: &str) -> ChatService {
    let config = StreamingConfig {
        command: command.to_string(),
        args: vec!["-c".to_string(), script.to_string(), "fake-cli".to_string()],
        ..StreamingConfig::default()
    };
    ChatService::new(
        Backends::new(
            quick_backend(Arc::new(StreamingAdapter::new(config)), 0, 5),
            quick_backend(StubAdapter::new(AdapterKind::Direct, vec![]), 0, 5),
        ),
        SessionConfig::default(),
        SessionStore::new(),
    )
}

#[tokio::test]
async fn test_streaming_correlation_is_resumed_on_next_send() {
    let service = service_running(FAKE_CLI, "sh");
    let session = service.create_session("").await;

    let first = service.send(&session.id, "hello", true).await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.session.messages.last().unwrap().content, "resume=none");
    assert_eq!(first.session.backend_correlation_id.as_deref(), Some("corr-42"));

    let second = service.send(&session.id, "again", true).await.unwrap();
    let reply = second.session.messages.last().unwrap();
    assert_eq!(reply.content, "resume=corr-42");
    assert_eq!(reply.metadata["num_turns"], serde_json::json!(1));
    assert_eq!(reply.metadata["input_tokens"], serde_json::json!(3));
}

#[tokio::test]
async fn test_missing_binary_becomes_remediation_reply() {
    let service = service_running("", "parley-test-no-such-binary");
    let session = service.create_session("").await;

    let outcome = service.send(&session.id, "hello", true).await.unwrap();

    let reply = outcome.reply.as_ref().unwrap();
    assert!(reply.is_error());
    assert_eq!(reply.metadata["needs_setup"], serde_json::json!(true));
    assert_eq!(outcome.session.messages.len(), 2);
    assert!(outcome.session.error.is_some());
    assert!(!outcome.session.has_pending_reply());
}

#[tokio::test]
async fn test_nonzero_exit_without_result_is_remediated() {
    let service = service_running("echo 'segfault-ish' >&2; exit 3", "sh");
    let session = service.create_session("").await;

    let outcome = service.send(&session.id, "hello", true).await.unwrap();

    let reply = outcome.reply.as_ref().unwrap();
    assert!(reply.is_error());
    let assistant = outcome.session.messages.last().unwrap();
    assert!(assistant.content.contains('3'));
    assert!(matches!(
        outcome.session.error.as_deref(),
        Some(e) if e.contains("exit code 3")
    ));
}

#[tokio::test]
async fn test_stream_without_result_falls_back_to_last_event() {
    let service = service_running(r#"echo '{"type":"assistant","message":"partial"}'"#, "sh");
    let session = service.create_session("").await;

    let outcome = service.send(&session.id, "hello", true).await.unwrap();

    assert!(outcome.is_success());
    assert!(outcome
        .session
        .messages
        .last()
        .unwrap()
        .content
        .contains("partial"));
}
