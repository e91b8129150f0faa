use colored::Colorize;
use prettytable::{format, Table};

use super::print_message;
use crate::chat::ChatService;
use crate::cli::SessionCommand;
use crate::error::Result;
use crate::session::SessionSummary;

const TITLE_WIDTH: usize = 40;

/// Handle `parley sessions ...`
pub async fn handle_sessions(service: &ChatService, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::List { json } => {
            let sessions = service.list_sessions().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                let current = service.current_session().await?.id;
                print_table(&sessions, &current);
            }
        }
        SessionCommand::New { title } => {
            let session = service.create_session(title.as_deref().unwrap_or("")).await;
            println!("{}", format!("Created session {}", session.id).green());
        }
        SessionCommand::Show { id, json } => {
            let session = service.get_session(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                println!("{} ({})", session.title.bold(), session.id.cyan());
                if let Some(err) = &session.error {
                    println!("{}", format!("Last error: {}", err).yellow());
                }
                println!();
                for message in &session.messages {
                    print_message(message);
                }
            }
        }
        SessionCommand::Delete { id } => {
            service.remove_session(&id).await?;
            println!("{}", format!("Deleted session {}", id).green());
        }
    }

    Ok(())
}

fn short_title(title: &str) -> String {
    if title.chars().count() > TITLE_WIDTH {
        let cut: String = title.chars().take(TITLE_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}

fn print_table(sessions: &[SessionSummary], current: &str) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "",
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Activity".bold()
    ]);

    for session in sessions {
        let marker = if session.id == current { "*" } else { "" };
        let title = if session.has_error {
            format!("{} {}", short_title(&session.title), "(error)".red())
        } else {
            short_title(&session.title)
        };
        table.add_row(prettytable::row![
            marker,
            session.id.cyan(),
            title,
            session.message_count,
            session.last_activity
        ]);
    }

    println!("\nSessions:");
    table.printstd();
    println!();
    println!(
        "Use {} to continue a session.",
        "parley chat --resume <ID>".cyan()
    );
    println!();
}
