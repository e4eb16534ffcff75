//! Graceful Shutdown Handler
//!
//! A stop request never interrupts a tick. The coordinator checks the flag once
//! per loop iteration, then runs its shutdown sequence: final checkpoint,
//! optional export, done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM / SIGINT
    Graceful,
    /// Requested through the coordinator handle
    Requested,
    /// The configured tick budget was used up
    TickLimit,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Requested => write!(f, "requested"),
            ShutdownSignal::TickLimit => write!(f, "tick_limit"),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Writing the final checkpoint
    Checkpointing,
    /// Writing the final export
    Exporting,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::Checkpointing => write!(f, "checkpointing"),
            ShutdownPhase::Exporting => write!(f, "exporting"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    shutdown_requested: AtomicBool,
    phase: watch::Sender<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);

        Self {
            shutdown_requested: AtomicBool::new(false),
            phase,
            signal_tx,
        }
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Get a receiver for phase changes
    pub fn phase_receiver(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Get current shutdown phase
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!(%signal, "Shutdown already requested, ignoring duplicate signal");
            return;
        }

        info!(%signal, "Shutdown requested");
        let _ = self.signal_tx.send(signal);
    }

    pub(crate) fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!(%phase, "Shutdown phase");
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        info!(signal = name, "Received signal");
                        shutdown.request_shutdown(ShutdownSignal::Graceful);
                    });
                }
                Err(e) => error!(signal = name, error = %e, "Failed to install signal handler"),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::TickLimit.to_string(), "tick_limit");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::new();
        let mut rx = shutdown.subscribe();

        assert!(!shutdown.is_shutdown_requested());
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Running);

        shutdown.request_shutdown(ShutdownSignal::Requested);
        assert!(shutdown.is_shutdown_requested());
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Requested);

        // Duplicate request should be ignored
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_phase_receiver_sees_updates() {
        let shutdown = GracefulShutdown::new();
        let mut phases = shutdown.phase_receiver();

        shutdown.set_phase(ShutdownPhase::Checkpointing);
        phases.changed().await.unwrap();
        assert_eq!(*phases.borrow(), ShutdownPhase::Checkpointing);
    }
}
