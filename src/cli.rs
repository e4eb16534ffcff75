use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{CriteriaTable, Phase};
use crate::error::Result;
use crate::persistence::{CheckpointManager, CheckpointRecord};
use crate::services::ExportFormat;

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(version = "0.1.0")]
#[command(about = "Phase-gated multi-agent coordinator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overrides
    #[arg(long, global = true, default_value = "config", env = "PHASEGATE_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the agents and run the coordinator until Ctrl+C
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Format of the export written on shutdown (json, csv)
        #[arg(long, value_parser = parse_export_format)]
        export_format: Option<ExportFormat>,
    },
    /// Inspect checkpoints
    #[command(subcommand)]
    Checkpoint(CheckpointCommands),
    /// Print the phase completion criteria
    Criteria,
}

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// Show the most recent checkpoint
    Latest {
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_export_format(s: &str) -> std::result::Result<ExportFormat, String> {
    s.parse().map_err(|e: crate::error::PhaseGateError| e.to_string())
}

/// Print the criteria table, one row per phase
pub fn print_criteria(criteria: &CriteriaTable) {
    println!("=== Phase Criteria ===");
    println!(
        "  {:<12} {:>14} {:>16} {:>13}",
        "Phase", "min_threshold", "stability_count", "max_variance"
    );
    for phase in Phase::ALL {
        let c = criteria.get(phase);
        println!(
            "  {:<12} {:>14.3} {:>16} {:>13.3}",
            phase.as_str(),
            c.min_threshold,
            c.stability_count,
            c.max_variance
        );
    }
}

/// Print the newest checkpoint in the manager's directory
pub fn show_latest_checkpoint(manager: &CheckpointManager, json: bool) -> Result<()> {
    match manager.load_latest()? {
        Some(record) if json => {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Some(record) => print_checkpoint_summary(&record),
        None => {
            println!(
                "No checkpoints found in {}",
                manager.dir().display()
            );
        }
    }
    Ok(())
}

fn print_checkpoint_summary(record: &CheckpointRecord) {
    println!("=== Latest Checkpoint ===");
    println!("  ID:        {}", record.id);
    println!("  Created:   {}", record.created_at.to_rfc3339());
    println!("  Reason:    {}", record.reason);
    println!("  Component: {}", record.component);

    let Some(agents) = record.state.get("agents").and_then(|a| a.as_object()) else {
        return;
    };
    if let Some(tick) = record.state.get("tick").and_then(|t| t.as_u64()) {
        println!("  Tick:      {}", tick);
    }

    println!("\n  Agents:");
    for (name, agent) in agents {
        let phase = agent
            .pointer("/state/phase")
            .and_then(|p| p.as_str())
            .unwrap_or("?");
        let progress = agent
            .pointer("/state/progress")
            .and_then(|p| p.as_u64())
            .unwrap_or(0);
        let status = agent
            .pointer("/status/status")
            .and_then(|s| s.as_str())
            .unwrap_or("?");
        println!(
            "    {:<12} {:<12} phase={:<11} progress={}%",
            name, status, phase, progress
        );
    }
}
