//! Hivemind CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use hivemind::cli::commands::{
    handle_init, handle_metrics, handle_sessions, handle_spawn, handle_status, handle_transition,
    TransitionAction,
};
use hivemind::cli::{Cli, Commands};
use hivemind::infrastructure::config::ConfigLoader;
use hivemind::infrastructure::logging::init_tracing;
use hivemind::HiveConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init runs before any config file exists.
    if let Commands::Init { force } = &cli.command {
        let config = HiveConfig::default();
        init_tracing(&config.logging);
        return handle_init(&config, *force, cli.json).await;
    }

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Init { .. } => unreachable!("init handled above"),
        Commands::Spawn {
            objective,
            queen_type,
            max_workers,
            consensus,
            non_interactive,
        } => {
            handle_spawn(
                config,
                objective,
                queen_type,
                max_workers,
                consensus,
                non_interactive,
                cli.json,
            )
            .await
        }
        Commands::Status => handle_status(config, cli.json).await,
        Commands::Sessions => handle_sessions(config, cli.json).await,
        Commands::Pause { session_id } => {
            handle_transition(config, &session_id, TransitionAction::Pause, cli.json).await
        }
        Commands::Resume { session_id } => {
            handle_transition(config, &session_id, TransitionAction::Resume, cli.json).await
        }
        Commands::Stop { session_id } => {
            handle_transition(config, &session_id, TransitionAction::Stop, cli.json).await
        }
        Commands::Metrics => handle_metrics(config, cli.json).await,
    }
}
