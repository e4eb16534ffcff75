//! Coordinator Commands: on-demand requests handled between ticks

use std::path::PathBuf;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::persistence::SavedCheckpoint;
use crate::services::ExportFormat;

/// Control commands sent to the coordinator through its handle
#[derive(Debug)]
pub enum CoordinatorControlCommand {
    /// Write an on-demand checkpoint of the current system state
    CheckpointNow(oneshot::Sender<Result<SavedCheckpoint>>),
    /// Export all logged training events
    Export {
        format: ExportFormat,
        reply: oneshot::Sender<Result<Vec<PathBuf>>>,
    },
}
