use clap::Parser;
use phasegate::cli::{self, CheckpointCommands, Cli, Commands};
use phasegate::config::AppConfig;
use phasegate::coordinator::{self, RunOptions};
use phasegate::persistence::CheckpointManager;
use tracing::{error, info};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            ticks,
            export_format,
        } => {
            let config = AppConfig::load_validated(&cli.config_dir)?;
            init_logging(&config.logging);
            info!(config_dir = %cli.config_dir.display(), "Configuration loaded");

            let options = RunOptions {
                max_ticks: ticks,
                export_format,
            };
            if let Err(e) = coordinator::start(&config, options).await {
                error!(error = %e, "Coordinator exited with error");
                return Err(e.into());
            }
        }
        Commands::Checkpoint(CheckpointCommands::Latest { json }) => {
            init_logging_simple();
            let config = AppConfig::load_validated(&cli.config_dir)?;
            let manager = CheckpointManager::new(config.checkpoint);
            cli::show_latest_checkpoint(&manager, json)?;
        }
        Commands::Criteria => {
            init_logging_simple();
            let config = AppConfig::load_validated(&cli.config_dir)?;
            cli::print_criteria(&config.criteria);
        }
    }

    Ok(())
}
