//! Checkpoint Manager
//!
//! Writes immutable, timestamped snapshots of system state to a directory.
//! Checkpoints are created:
//! - When an agent finishes initialization
//! - On a regular interval (default: 30s)
//! - On demand
//! - Before shutdown

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PhaseGateError, Result};

use super::staging::{pretty_json, StagedFile};

const CHECKPOINT_STEM: &str = "checkpoint";
const CHECKPOINT_EXT: &str = "json";

/// Configuration for checkpoint manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory receiving `checkpoint_<YYYYMMDD_HHMMSS>.json` files
    pub dir: String,
    /// Minimum time between periodic checkpoints (default: 30s)
    pub interval_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: "checkpoints".to_string(),
            interval_secs: 30,
        }
    }
}

impl CheckpointConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Why a checkpoint was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    Initialization,
    Periodic,
    OnDemand,
    Shutdown,
}

impl fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointReason::Initialization => "initialization",
            CheckpointReason::Periodic => "periodic",
            CheckpointReason::OnDemand => "on_demand",
            CheckpointReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Checkpoint data structure, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub reason: CheckpointReason,
    pub component: String,
    pub state: serde_json::Value,
}

/// Trait for types that can be checkpointed
pub trait Checkpointable: Send + Sync {
    /// Component name stored alongside the snapshot
    fn component_name(&self) -> &str;

    /// Serialize current state to JSON
    fn to_checkpoint(&self) -> Result<serde_json::Value>;
}

/// Written checkpoint, as reported back to callers
#[derive(Debug, Clone)]
pub struct SavedCheckpoint {
    pub id: Uuid,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// A save in progress.
///
/// Dropping a session without calling [`CheckpointSession::commit`] discards
/// the staged record and leaves the manager's cadence untouched.
#[derive(Debug)]
pub struct CheckpointSession<'a> {
    manager: &'a mut CheckpointManager,
    staged: StagedFile,
    record: CheckpointRecord,
}

impl<'a> CheckpointSession<'a> {
    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    /// Publish the record and advance the manager's cadence
    pub async fn commit(self) -> Result<SavedCheckpoint> {
        let contents = pretty_json(&self.record)?;
        let Self {
            manager,
            staged,
            record,
        } = self;
        let path = staged.commit_with(contents).await?;

        manager.last_checkpoint_time = Some(record.created_at);
        manager.saved_count += 1;

        info!(
            id = %record.id,
            reason = %record.reason,
            component = %record.component,
            path = %path.display(),
            "Checkpoint saved"
        );

        Ok(SavedCheckpoint {
            id: record.id,
            path,
            created_at: record.created_at,
        })
    }
}

/// Checkpoint manager for periodic and on-demand state snapshots
#[derive(Debug)]
pub struct CheckpointManager {
    config: CheckpointConfig,
    last_checkpoint_time: Option<DateTime<Utc>>,
    saved_count: u64,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Self {
        Self {
            config,
            last_checkpoint_time: None,
            saved_count: 0,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CheckpointConfig::default())
    }

    pub fn dir(&self) -> &Path {
        Path::new(&self.config.dir)
    }

    pub fn last_checkpoint_time(&self) -> Option<DateTime<Utc>> {
        self.last_checkpoint_time
    }

    pub fn saved_count(&self) -> u64 {
        self.saved_count
    }

    /// A periodic checkpoint is due once `interval` has elapsed since the last
    /// successful save, or immediately if none was ever written
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checkpoint_time {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed
                    .to_std()
                    .map(|elapsed| elapsed >= self.config.interval())
                    .unwrap_or(false)
            }
        }
    }

    /// Open a save session for `state`
    pub async fn session(
        &mut self,
        reason: CheckpointReason,
        component: &str,
        state: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<CheckpointSession<'_>> {
        let staged =
            StagedFile::begin_async(self.dir().to_path_buf(), CHECKPOINT_STEM, now, CHECKPOINT_EXT)
                .await?;
        let record = CheckpointRecord {
            id: Uuid::new_v4(),
            created_at: now,
            reason,
            component: component.to_string(),
            state,
        };
        Ok(CheckpointSession {
            manager: self,
            staged,
            record,
        })
    }

    /// Save raw state in one step
    pub async fn save(
        &mut self,
        reason: CheckpointReason,
        component: &str,
        state: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<SavedCheckpoint> {
        let result = match self.session(reason, component, state, now).await {
            Ok(session) => session.commit().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(reason = %reason, component, error = %e, "Checkpoint save failed");
        }
        result
    }

    /// Create a checkpoint for a component
    pub async fn checkpoint<T: Checkpointable + ?Sized>(
        &mut self,
        reason: CheckpointReason,
        component: &T,
        now: DateTime<Utc>,
    ) -> Result<SavedCheckpoint> {
        let state = component.to_checkpoint()?;
        self.save(reason, component.component_name(), state, now)
            .await
    }

    /// Most recent record in the checkpoint directory, by creation time
    pub fn load_latest(&self) -> Result<Option<CheckpointRecord>> {
        let dir = self.dir();
        if !dir.exists() {
            debug!(dir = %dir.display(), "No checkpoint directory");
            return Ok(None);
        }

        let mut latest: Option<CheckpointRecord> = None;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !is_checkpoint_file(&path) {
                continue;
            }

            let text = std::fs::read_to_string(&path)?;
            let record: CheckpointRecord = serde_json::from_str(&text).map_err(|e| {
                PhaseGateError::Persistence(format!(
                    "corrupt checkpoint {}: {e}",
                    path.display()
                ))
            })?;

            let newer = latest
                .as_ref()
                .map(|current| record.created_at >= current.created_at)
                .unwrap_or(true);
            if newer {
                latest = Some(record);
            }
        }

        Ok(latest)
    }
}

fn is_checkpoint_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.starts_with(CHECKPOINT_STEM)
        && path.extension().and_then(|e| e.to_str()) == Some(CHECKPOINT_EXT)
}
