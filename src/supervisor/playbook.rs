//! Recovery System
//!
//! Runs the stabilize action after a degraded health check or a failed step.
//! Only one stabilization runs at a time; requests arriving meanwhile are
//! dropped and counted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Recovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    Ready,
    Stabilizing,
}

impl std::fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStatus::Ready => write!(f, "Ready"),
            RecoveryStatus::Stabilizing => write!(f, "Stabilizing"),
        }
    }
}

/// What became of a stabilize request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StabilizeOutcome {
    Completed,
    Failed { error: String },
    /// Another stabilization was already running
    Dropped,
}

impl StabilizeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StabilizeOutcome::Completed)
    }
}

/// The action run while stabilizing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn recover(&self, reason: &str) -> Result<()>;
}

/// Default handler: nothing to repair, the status round-trip is the recovery
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecovery;

#[async_trait]
impl RecoveryHandler for NoopRecovery {
    async fn recover(&self, reason: &str) -> Result<()> {
        debug!(reason, "No recovery action configured");
        Ok(())
    }
}

/// Clears the stabilizing flag even if the recovery future is dropped
struct StabilizingGuard<'a>(&'a AtomicBool);

impl Drop for StabilizingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RecoverySystem {
    handler: Arc<dyn RecoveryHandler>,
    stabilizing: AtomicBool,
    completed: AtomicU64,
    dropped: AtomicU64,
}

impl RecoverySystem {
    pub fn new(handler: Arc<dyn RecoveryHandler>) -> Self {
        Self {
            handler,
            stabilizing: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(NoopRecovery))
    }

    pub fn get_status(&self) -> RecoveryStatus {
        if self.stabilizing.load(Ordering::SeqCst) {
            RecoveryStatus::Stabilizing
        } else {
            RecoveryStatus::Ready
        }
    }

    /// `Ready -> Stabilizing -> (recovery action) -> Ready`
    pub async fn stabilize(&self, reason: &str) -> StabilizeOutcome {
        if self
            .stabilizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(reason, dropped, "Stabilize requested while stabilizing; dropped");
            return StabilizeOutcome::Dropped;
        }
        let _guard = StabilizingGuard(&self.stabilizing);

        info!(reason, "Stabilizing system");
        match self.handler.recover(reason).await {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                info!("Recovery process completed");
                StabilizeOutcome::Completed
            }
            Err(e) => {
                warn!(error = %e, "Recovery action failed");
                StabilizeOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for RecoverySystem {
    fn default() -> Self {
        Self::with_defaults()
    }
}
