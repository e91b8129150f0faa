//! Special commands parser for interactive chat
//!
//! Special commands manage sessions and the active backend instead of being
//! sent as prompts. They are prefixed with `/` and are case-insensitive;
//! session ids and titles keep the case they were typed in.

use crate::backend::AdapterKind;
use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new session, optionally titled
    NewSession(Option<String>),

    /// List stored sessions
    ListSessions,

    /// Make another session current
    SwitchSession(String),

    /// Change the backend used for following prompts
    SwitchBackend(AdapterKind),

    /// Show the current session and backend
    ShowStatus,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the input as a prompt
    None,
}

/// Parse a user input string into a special command
///
/// # Errors
///
/// Returns `CommandError` for an unknown `/command` or a bad argument.
///
/// # Examples
///
/// ```
/// use parley::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/quit").unwrap(), SpecialCommand::Exit);
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, arg)) => (command.to_lowercase(), arg.trim()),
        None => (lower.clone(), ""),
    };

    match command.as_str() {
        "exit" | "quit" | "/exit" | "/quit" | "/q" => Ok(SpecialCommand::Exit),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/status" => Ok(SpecialCommand::ShowStatus),
        "/sessions" => Ok(SpecialCommand::ListSessions),

        "/new" => Ok(SpecialCommand::NewSession(
            (!arg.is_empty()).then(|| arg.to_string()),
        )),

        "/switch" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/switch".to_string(),
            usage: "/switch <session-id>".to_string(),
        }),
        "/switch" => Ok(SpecialCommand::SwitchSession(arg.to_string())),

        "/mode" => match arg.to_lowercase().as_str() {
            "" => Err(CommandError::MissingArgument {
                command: "/mode".to_string(),
                usage: "/mode <streaming|direct>".to_string(),
            }),
            "streaming" | "stream" => Ok(SpecialCommand::SwitchBackend(AdapterKind::Streaming)),
            "direct" => Ok(SpecialCommand::SwitchBackend(AdapterKind::Direct)),
            other => Err(CommandError::UnsupportedArgument {
                command: "/mode".to_string(),
                arg: other.to_string(),
            }),
        },

        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print help for special commands
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat
=====================================

SESSIONS:
  /new [title]        - Start a new session
  /sessions           - List stored sessions
  /switch <id>        - Continue another session

BACKEND:
  /mode streaming     - Send prompts through the streaming CLI backend
  /mode direct        - Send prompts through the direct HTTP backend

OTHER:
  /status             - Show the current session and backend
  /help               - Show this help
  /quit, /exit        - Leave the chat
"#
    );
}
