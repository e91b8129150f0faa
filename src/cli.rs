//! Command-line interface definition for Parley
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat, one-shot sends and
//! session management.

use clap::{Parser, Subcommand};

/// Parley - chat with AI backends through a resilient session core
///
/// Sends prompts to a streaming CLI backend or a direct HTTP backend,
/// keeping every conversation in a local JSON session document.
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the session document location
    #[arg(long)]
    pub storage_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Parley
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat
    Chat {
        /// Backend to use (streaming, direct); defaults to the configured one
        #[arg(short, long)]
        backend: Option<String>,

        /// Resume an existing session instead of the most recent one
        #[arg(short, long)]
        resume: Option<String>,

        /// Start with a fresh session
        #[arg(long, conflicts_with = "resume")]
        new: bool,
    },

    /// Send a single prompt and print the reply
    Send {
        /// Prompt text
        prompt: String,

        /// Backend to use (streaming, direct); defaults to the configured one
        #[arg(short, long)]
        backend: Option<String>,

        /// Session to send in; defaults to the current session
        #[arg(short, long)]
        session: Option<String>,

        /// Print the updated session as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage stored sessions
    Sessions {
        /// Session management subcommand
        #[command(subcommand)]
        command: SessionCommand,
    },
}

/// Session management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List sessions, most recent first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new session and make it current
    New {
        /// Optional title
        title: Option<String>,
    },

    /// Show the messages of a session
    Show {
        /// Session id
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a session
    Delete {
        /// Session id
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_chat_defaults() {
        let cli = Cli::try_parse_from(["parley", "chat"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("config/config.yaml"));
        assert!(!cli.verbose);
        match cli.command {
            Commands::Chat {
                backend,
                resume,
                new,
            } => {
                assert!(backend.is_none());
                assert!(resume.is_none());
                assert!(!new);
            }
            _ => panic!("Expected Chat command"),
        }
    }

    #[test]
    fn test_cli_parse_send_with_options() {
        let cli = Cli::try_parse_from([
            "parley",
            "--storage-path",
            "/tmp/s.json",
            "send",
            "hello there",
            "--backend",
            "direct",
            "--session",
            "abc",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.storage_path.as_deref(), Some("/tmp/s.json"));
        match cli.command {
            Commands::Send {
                prompt,
                backend,
                session,
                json,
            } => {
                assert_eq!(prompt, "hello there");
                assert_eq!(backend.as_deref(), Some("direct"));
                assert_eq!(session.as_deref(), Some("abc"));
                assert!(json);
            }
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_cli_parse_sessions_subcommands() {
        let cli = Cli::try_parse_from(["parley", "sessions", "show", "id1", "--json"]).unwrap();
        match cli.command {
            Commands::Sessions {
                command: SessionCommand::Show { id, json },
            } => {
                assert_eq!(id, "id1");
                assert!(json);
            }
            _ => panic!("Expected Sessions Show command"),
        }

        let cli = Cli::try_parse_from(["parley", "sessions", "new"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sessions {
                command: SessionCommand::New { title: None }
            }
        ));
    }

    #[test]
    fn test_cli_chat_new_conflicts_with_resume() {
        let result = Cli::try_parse_from(["parley", "chat", "--new", "--resume", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_send_requires_prompt() {
        assert!(Cli::try_parse_from(["parley", "send"]).is_err());
    }
}
