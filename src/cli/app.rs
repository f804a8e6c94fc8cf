use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use layout_runtime::telemetry::init_logging;
use layout_runtime::RuntimeConfig;

use super::commands::Commands;
use super::env::CliArgs;
use super::replay::cmd_replay;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let config = RuntimeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, cli.json_logs || config.logging.json)?;

    info!("Starting layout-runtime v{}", env!("CARGO_PKG_VERSION"));
    info!(
        path = ?RuntimeConfig::file_path(cli.config.as_deref()),
        ladder = ?config.backoff_ladder_secs,
        process_delay_ms = config.field_process_delay_ms,
        min_validation_time_ms = config.min_validation_time_ms,
        "configuration loaded"
    );

    let result = match cli.command {
        Commands::Replay(args) => cmd_replay(args, &config).await,
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
