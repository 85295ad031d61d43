//! FAERS CLI - Main entry point

use clap::Parser;
use faers_cli::{Cli, Commands, DbCommand};
use faers_common::logging::init_logging;
use faers_common::{FaersError, Result};
use faers_etl::AppSettings;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

/// Load configuration, initialize logging, dispatch the command
async fn execute_command(cli: &Cli) -> Result<()> {
    let settings = AppSettings::load(cli.config.as_deref(), cli.profile.as_deref())?;

    let log_config = settings
        .logging
        .clone()
        .with_env_overrides()
        .map_err(|e| FaersError::config(e.to_string(), "Check LOG_LEVEL/LOG_FORMAT"))?;
    // The CLI still works without a subscriber
    let _ = init_logging(&log_config);

    match &cli.command {
        Commands::Db { command } => match command {
            DbCommand::Init => faers_cli::commands::db::init(&settings).await,
            DbCommand::Verify => faers_cli::commands::db::verify(&settings).await,
        },
        Commands::Download { quarter } => {
            faers_cli::commands::download::run(&settings, *quarter).await
        },
        Commands::Run { mode, quarter } => {
            faers_cli::commands::run::run(&settings, *mode, quarter.clone()).await
        },
    }
}
