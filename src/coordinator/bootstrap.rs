//! Bootstrap: wires up the Coordinator and its agents from config
//!
//! Entry point for `phasegate run`. Builds the observer, registers the
//! configured agents, installs signal handlers, and runs the coordinator loop
//! until shutdown.

use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::coordination::install_signal_handlers;
use crate::error::Result;
use crate::services::{ExportFormat, Observer, TracingObserver};

use super::coordinator::{Coordinator, RunSummary};

/// Runtime overrides taken from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
    /// Overrides `export.format` for the shutdown export
    pub export_format: Option<ExportFormat>,
}

/// Build the coordinator for `config` with every configured agent registered
pub fn build_coordinator(config: &AppConfig, observer: Arc<dyn Observer>) -> Result<Coordinator> {
    let mut coordinator = Coordinator::new(config, observer);
    coordinator.register_configured_agents()?;
    Ok(coordinator)
}

/// Start the coordinator and block until it stops
pub async fn start(config: &AppConfig, options: RunOptions) -> Result<RunSummary> {
    let mut coordinator = build_coordinator(config, Arc::new(TracingObserver))?;
    if let Some(format) = options.export_format {
        coordinator = coordinator.with_export_format(format);
    }

    info!(
        agents = ?config.coordinator.agents,
        checkpoint_dir = %config.checkpoint.dir,
        export_dir = %config.export.dir,
        "Starting phasegate coordinator"
    );

    install_signal_handlers(coordinator.shutdown_handle());
    let summary = coordinator.run(options.max_ticks).await?;

    info!(
        ticks = summary.ticks,
        checkpoints = summary.checkpoints_saved,
        exported = summary.exported.len(),
        "Shutdown complete"
    );
    Ok(summary)
}
