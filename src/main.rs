//! Parley - resilient chat backend CLI
//!
#![doc = "Parley - resilient chat backend CLI"]
#![doc = "Main entry point for the Parley application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use parley::cli::{Cli, Commands};
use parley::commands;
use parley::config::Config;
use parley::ChatService;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Initialize tracing
    init_tracing(cli.verbose, config.logging.json);

    // Validate configuration
    config.validate()?;

    // The service owns the store and both backends for the whole process
    let service = ChatService::from_config(&config)?;

    match cli.command {
        Commands::Chat {
            backend,
            resume,
            new,
        } => {
            tracing::info!("Starting interactive chat");
            let use_streaming = config.use_streaming(backend.as_deref())?;
            if let Some(r) = &resume {
                tracing::debug!("Resuming session: {}", r);
            }
            commands::chat::run_chat(&service, use_streaming, resume, new).await?;
            Ok(())
        }
        Commands::Send {
            prompt,
            backend,
            session,
            json,
        } => {
            let use_streaming = config.use_streaming(backend.as_deref())?;
            commands::send::run_send(&service, &prompt, session.as_deref(), use_streaming, json)
                .await?;
            Ok(())
        }
        Commands::Sessions { command } => {
            commands::sessions::handle_sessions(&service, command).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over the verbosity flag.
fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "parley=debug" } else { "parley=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
