//! Persistence Layer for checkpoints and exports
//!
//! - Checkpoint manager for timestamped state snapshots
//! - Staged file writes shared by checkpoints and metric exports

pub mod checkpoint;
pub mod staging;

pub use checkpoint::{
    CheckpointConfig, CheckpointManager, CheckpointReason, CheckpointRecord, CheckpointSession,
    Checkpointable, SavedCheckpoint,
};
pub use staging::{
    pretty_json, unique_path, write_new_files, NewFile, StagedFile, FILE_TIMESTAMP_FORMAT,
};
