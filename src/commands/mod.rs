//! Command handlers for the CLI
//!
//! Each handler takes an already constructed [`ChatService`] so the entry
//! point owns its lifecycle:
//!
//! - `chat`     - interactive REPL
//! - `send`     - one prompt, one reply
//! - `sessions` - list, create, show and delete stored sessions

use colored::Colorize;

use crate::chat::{ChatService, SendOutcome};
use crate::error::{ParleyError, Result};
use crate::session::{Message, Role, Session};

pub mod chat;
pub mod send;
pub mod sessions;
pub mod special_commands;

/// Resolve `id` to a session, or the current session when `None`
pub(crate) async fn resolve_session(service: &ChatService, id: Option<&str>) -> Result<Session> {
    match id {
        Some(id) => service.select_session(id).await,
        None => service.current_session().await,
    }
}

/// One-line summary of the usage metadata on a reply, if any was reported
pub(crate) fn usage_line(message: &Message) -> Option<String> {
    let meta = &message.metadata;
    let mut parts = Vec::new();
    if let (Some(input), Some(output)) = (
        meta.get("input_tokens").and_then(|v| v.as_u64()),
        meta.get("output_tokens").and_then(|v| v.as_u64()),
    ) {
        let approx = if meta.get("estimated_usage").and_then(|v| v.as_bool()) == Some(true) {
            "~"
        } else {
            ""
        };
        parts.push(format!("{}{} in / {}{} out tokens", approx, input, approx, output));
    }
    if let Some(cost) = meta.get("cost_usd").and_then(|v| v.as_f64()) {
        parts.push(format!("${:.4}", cost));
    }
    if let Some(ms) = meta.get("duration_ms").and_then(|v| v.as_u64()) {
        parts.push(format!("{:.1}s", ms as f64 / 1000.0));
    }
    if let Some(turns) = meta.get("num_turns").and_then(|v| v.as_u64()) {
        parts.push(format!("{} turns", turns));
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Print one message the way the REPL and `sessions show` render it
pub(crate) fn print_message(message: &Message) {
    let label = match message.role {
        Role::User => "you".cyan().bold(),
        Role::Assistant => "assistant".green().bold(),
    };
    println!("{} {}", label, message.timestamp.dimmed());
    println!("{}", message.content);
    if let Some(usage) = usage_line(message) {
        println!("{}", usage.dimmed());
    }
    println!();
}

/// Print the outcome of a send: the reply, or the failure attached to the session
pub(crate) fn print_outcome(outcome: &SendOutcome) {
    match &outcome.reply {
        Ok(_) => {
            if let Some(last) = outcome.session.messages.last() {
                print_message(last);
            }
            if let Some(err) = &outcome.session.error {
                println!("{}", format!("Backend reported an error: {}", err).yellow());
            }
        }
        Err(err @ ParleyError::CircuitOpen { .. }) => {
            println!("{}", err.to_string().yellow());
        }
        Err(err) => {
            println!("{}", format!("Send failed: {}", err).red());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_line_reports_estimates() {
        let mut message = Message::assistant("hi");
        assert_eq!(usage_line(&message), None);

        message.metadata.insert("input_tokens".into(), json!(12));
        message.metadata.insert("output_tokens".into(), json!(30));
        message.metadata.insert("estimated_usage".into(), json!(true));
        message.metadata.insert("cost_usd".into(), json!(0.0005));
        assert_eq!(
            usage_line(&message).unwrap(),
            "~12 in / ~30 out tokens, $0.0005"
        );
    }

    #[test]
    fn test_usage_line_duration_and_turns() {
        let mut message = Message::assistant("hi");
        message.metadata.insert("duration_ms".into(), json!(2500));
        message.metadata.insert("num_turns".into(), json!(2));
        assert_eq!(usage_line(&message).unwrap(), "2.5s, 2 turns");
    }
}
