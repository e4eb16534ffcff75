//! Observer sink for coordinator events
//!
//! The coordinator is handed an `Arc<dyn Observer>` at construction and
//! reports everything worth rendering through it. Rendering is up to the
//! implementation: `TracingObserver` turns events into log records,
//! `BroadcastObserver` fans them out to subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::agents::PhaseTransition;
use crate::coordinator::state::CoordinatorState;
use crate::domain::{MetricsSnapshot, Phase};
use crate::persistence::CheckpointReason;
use crate::supervisor::{RecoveryStatus, StabilizeOutcome};
use crate::validation::ValidationStatus;

/// Structured event emitted by the coordinator
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObserverEvent {
    Tick {
        agent: String,
        phase: Phase,
        metrics: MetricsSnapshot,
        validation_status: ValidationStatus,
    },
    PhaseTransition(PhaseTransition),
    SignificantChange {
        agent: String,
        phase: Phase,
        metrics: MetricsSnapshot,
        previous_coherence: Option<f64>,
    },
    AgentError {
        agent: String,
        error: String,
    },
    StateChanged {
        from: CoordinatorState,
        to: CoordinatorState,
    },
    Recovery {
        status: RecoveryStatus,
        outcome: Option<StabilizeOutcome>,
    },
    PersistenceError {
        operation: String,
        error: String,
        consecutive_failures: u32,
    },
    Checkpoint {
        reason: CheckpointReason,
        path: PathBuf,
        at: DateTime<Utc>,
    },
    Exported {
        files: Vec<PathBuf>,
    },
}

/// Receiver of coordinator events
pub trait Observer: Send + Sync {
    fn notify(&self, event: &ObserverEvent);
}

/// Renders events as tracing records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn notify(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::Tick {
                agent,
                phase,
                metrics,
                validation_status,
            } => debug!(
                agent = %agent,
                phase = %phase,
                metrics = %metrics,
                counter = validation_status.stability_counter,
                required = validation_status.required,
                ready = validation_status.transition_ready,
                "Metrics update"
            ),
            ObserverEvent::PhaseTransition(t) => info!(
                agent = %t.agent,
                from = %t.from_phase,
                to = %t.to_phase,
                final_metrics = %t.final_metrics,
                "Phase transition event"
            ),
            ObserverEvent::SignificantChange {
                agent,
                phase,
                metrics,
                previous_coherence,
            } => info!(
                agent = %agent,
                phase = %phase,
                metrics = %metrics,
                previous = ?previous_coherence,
                "Significant change detected"
            ),
            ObserverEvent::AgentError { agent, error } => {
                error!(agent = %agent, error = %error, "Agent error")
            }
            ObserverEvent::StateChanged { from, to } => {
                info!(from = %from, to = %to, "Coordinator state changed")
            }
            ObserverEvent::Recovery { status, outcome } => {
                info!(status = %status, outcome = ?outcome, "Recovery")
            }
            ObserverEvent::PersistenceError {
                operation,
                error,
                consecutive_failures,
            } => warn!(
                operation = %operation,
                error = %error,
                consecutive_failures,
                "Persistence failure"
            ),
            ObserverEvent::Checkpoint { reason, path, .. } => {
                debug!(reason = %reason, path = %path.display(), "Checkpoint written")
            }
            ObserverEvent::Exported { files } => {
                info!(files = files.len(), "Export complete")
            }
        }
    }
}

/// Fans events out over a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    event_tx: broadcast::Sender<ObserverEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Subscribe to observer events
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Observer for BroadcastObserver {
    fn notify(&self, event: &ObserverEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event.clone());
    }
}

/// Forwards every event to each inner observer in order
#[derive(Default)]
pub struct FanoutObserver {
    observers: Vec<std::sync::Arc<dyn Observer>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl Observer for FanoutObserver {
    fn notify(&self, event: &ObserverEvent) {
        for observer in &self.observers {
            observer.notify(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_broadcast_observer_delivers_events() {
        let observer = BroadcastObserver::new(16);
        let mut rx = observer.subscribe();

        observer.notify(&ObserverEvent::AgentError {
            agent: "energy".to_string(),
            error: "boom".to_string(),
        });

        match rx.recv().await.unwrap() {
            ObserverEvent::AgentError { agent, .. } => assert_eq!(agent, "energy"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_notify_without_subscribers_is_harmless() {
        let observer = BroadcastObserver::default();
        observer.notify(&ObserverEvent::Exported { files: vec![] });
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_observer() {
        let a = BroadcastObserver::new(4);
        let b = BroadcastObserver::new(4);
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();

        let fanout = FanoutObserver::new()
            .with(Arc::new(TracingObserver))
            .with(Arc::new(a))
            .with(Arc::new(b));
        fanout.notify(&ObserverEvent::Exported { files: vec![] });

        assert!(matches!(rx_a.recv().await.unwrap(), ObserverEvent::Exported { .. }));
        assert!(matches!(rx_b.recv().await.unwrap(), ObserverEvent::Exported { .. }));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(ObserverEvent::AgentError {
            agent: "phase".to_string(),
            error: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "agent_error");
    }
}
