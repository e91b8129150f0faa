//! Interactive chat mode handler
//!
//! A readline loop that sends each line as a prompt to the current session
//! and handles `/` commands for session and backend management.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::special_commands::{parse_special_command, print_help, SpecialCommand};
use super::{print_message, print_outcome};
use crate::backend::AdapterKind;
use crate::chat::ChatService;
use crate::error::Result;
use crate::session::Session;

/// Start interactive chat
///
/// # Arguments
///
/// * `service` - Session service, shared with the entry point
/// * `use_streaming` - Initial backend choice
/// * `resume` - Session to continue instead of the current one
/// * `new_session` - Start with a fresh session
pub async fn run_chat(
    service: &ChatService,
    use_streaming: bool,
    resume: Option<String>,
    new_session: bool,
) -> Result<()> {
    let mut session = if new_session {
        service.create_session("").await
    } else {
        super::resolve_session(service, resume.as_deref()).await?
    };
    let mut backend = if use_streaming {
        AdapterKind::Streaming
    } else {
        AdapterKind::Direct
    };

    let mut rl = DefaultEditor::new()?;
    print_welcome_banner(&session, backend);
    for message in &session.messages {
        print_message(message);
    }

    loop {
        let prompt = format!("[{}] >> ", backend.as_str().cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match parse_special_command(trimmed) {
                    Ok(SpecialCommand::None) => {}
                    Ok(SpecialCommand::Exit) => break,
                    Ok(SpecialCommand::Help) => {
                        print_help();
                        continue;
                    }
                    Ok(SpecialCommand::ShowStatus) => {
                        print_status(&session, backend);
                        continue;
                    }
                    Ok(SpecialCommand::NewSession(title)) => {
                        session = service.create_session(title.as_deref().unwrap_or("")).await;
                        println!("{}\n", format!("Started session {}", session.id).green());
                        continue;
                    }
                    Ok(SpecialCommand::ListSessions) => {
                        for row in service.list_sessions().await {
                            let marker = if row.id == session.id { "*" } else { " " };
                            println!(
                                "{} {}  {}  ({} messages)",
                                marker,
                                row.id.cyan(),
                                row.title,
                                row.message_count
                            );
                        }
                        println!();
                        continue;
                    }
                    Ok(SpecialCommand::SwitchSession(id)) => {
                        match service.select_session(&id).await {
                            Ok(selected) => {
                                session = selected;
                                println!("{}\n", format!("Switched to {}", session.title).green());
                                for message in &session.messages {
                                    print_message(message);
                                }
                            }
                            Err(e) => println!("{}\n", e.to_string().red()),
                        }
                        continue;
                    }
                    Ok(SpecialCommand::SwitchBackend(kind)) => {
                        backend = kind;
                        println!("Using the {} backend\n", kind.as_str().cyan());
                        continue;
                    }
                    Err(e) => {
                        println!("{}\n", e.to_string().red());
                        continue;
                    }
                }

                rl.add_history_entry(trimmed)?;

                match service
                    .send(&session.id, trimmed, backend == AdapterKind::Streaming)
                    .await
                {
                    Ok(outcome) => {
                        print_outcome(&outcome);
                        session = outcome.session;
                    }
                    Err(e) => {
                        tracing::warn!("Send rejected: {:#}", e);
                        println!("{}\n", e.to_string().red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn print_welcome_banner(session: &Session, backend: AdapterKind) {
    println!("{}", "Parley interactive chat".bold());
    print_status(session, backend);
    println!("Type {} for commands, {} to leave.\n", "/help".cyan(), "/quit".cyan());
}

fn print_status(session: &Session, backend: AdapterKind) {
    println!("Session: {} ({})", session.title.bold(), session.id.dimmed());
    println!("Backend: {}", backend.as_str().cyan());
    println!("Messages: {}\n", session.messages.len());
}
