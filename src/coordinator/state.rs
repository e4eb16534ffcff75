//! Coordinator State: lifecycle and the shared read model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use crate::agents::{AgentKind, AgentState, TrainingStatus};
use crate::domain::metrics::{COHERENCE, ENERGY, PHASE};
use crate::domain::{MetricsSnapshot, Phase};
use crate::supervisor::{HealthStatus, RecoveryStatus};

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Initializing,
    Running,
    Degraded,
    Stopped,
}

impl CoordinatorState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: CoordinatorState) -> bool {
        use CoordinatorState::*;
        matches!(
            (self, target),
            (Idle, Initializing)
                | (Idle, Stopped)
                | (Initializing, Running)
                | (Initializing, Stopped)
                | (Running, Degraded)
                | (Running, Stopped)
                | (Degraded, Running)
                | (Degraded, Stopped)
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CoordinatorState::Running | CoordinatorState::Degraded)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinatorState::Idle => "IDLE",
            CoordinatorState::Initializing => "INITIALIZING",
            CoordinatorState::Running => "RUNNING",
            CoordinatorState::Degraded => "DEGRADED",
            CoordinatorState::Stopped => "STOPPED",
        };
        write!(f, "{}", s)
    }
}

/// Per-agent status line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Active,
    Training { phase: Phase, progress: u32 },
    Error { message: String },
}

impl AgentStatus {
    pub fn training(status: &TrainingStatus) -> Self {
        AgentStatus::Training {
            phase: status.phase,
            progress: status.progress,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Initializing => write!(f, "Initializing..."),
            AgentStatus::Active => write!(f, "Active"),
            AgentStatus::Training { phase, progress } => {
                write!(f, "Training - {} Phase ({}%)", phase.title(), progress)
            }
            AgentStatus::Error { message } => write!(f, "Error: {}", message),
        }
    }
}

/// Per-agent snapshot visible through the coordinator handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub name: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub focus: String,
    pub state: AgentState,
    pub metrics: Option<MetricsSnapshot>,
    /// Coherence of the initialization baseline sample
    pub baseline_coherence: Option<f64>,
}

/// System-wide state shared with the handle and written to checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub coordinator_state: CoordinatorState,
    pub health: HealthStatus,
    pub recovery: RecoveryStatus,
    pub tick: u64,
    /// Agents keyed by name
    pub agents: BTreeMap<String, AgentSnapshot>,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub consecutive_persistence_failures: u32,
    pub recoveries_dropped: u64,
    /// Logged training events per category
    pub events_logged: BTreeMap<String, usize>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SystemState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            coordinator_state: CoordinatorState::Idle,
            health: HealthStatus::Healthy,
            recovery: RecoveryStatus::Ready,
            tick: 0,
            agents: BTreeMap::new(),
            last_checkpoint: None,
            consecutive_persistence_failures: 0,
            recoveries_dropped: 0,
            events_logged: BTreeMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Agents currently stepping without error
    pub fn training_agent_count(&self) -> usize {
        self.agents
            .values()
            .filter(|a| matches!(a.status, AgentStatus::Training { .. } | AgentStatus::Active))
            .count()
    }

    /// Multi-line health summary for the periodic status log
    pub fn summary(&self) -> String {
        let last_checkpoint = self
            .last_checkpoint
            .map(|t| t.format("%Y%m%d_%H%M%S").to_string())
            .unwrap_or_else(|| "never".to_string());

        let mut out = format!(
            "=== PHASEGATE STATUS ===\n\
             State: {} | Tick: {}\n\
             System Health: {}\n\
             Last Checkpoint: {}\n\
             Recovery Status: {}\n",
            self.coordinator_state, self.tick, self.health, last_checkpoint, self.recovery
        );

        for (name, agent) in &self.agents {
            let metric = |key: &str| {
                agent
                    .metrics
                    .as_ref()
                    .and_then(|m| m.get(key))
                    .unwrap_or(0.0)
            };
            let _ = writeln!(
                out,
                "{}: {}\n  Coherence: {:.3} | Energy: {:.3} | Phase: {:.3}",
                name,
                agent.status,
                metric(COHERENCE),
                metric(ENERGY),
                metric(PHASE)
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use CoordinatorState::*;
        assert!(Idle.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Running));
        assert!(Running.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Running));
        assert!(Degraded.can_transition_to(Stopped));
    }

    #[test]
    fn test_invalid_transitions() {
        use CoordinatorState::*;
        assert!(!Idle.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Initializing));
        assert!(!Initializing.can_transition_to(Degraded));
    }

    #[test]
    fn test_agent_status_lines() {
        let training = AgentStatus::Training {
            phase: Phase::Discovery,
            progress: 42,
        };
        assert_eq!(training.to_string(), "Training - Discovery Phase (42%)");
        assert_eq!(
            AgentStatus::Error {
                message: "coherence too low".to_string()
            }
            .to_string(),
            "Error: coherence too low"
        );
    }

    #[test]
    fn test_summary_lists_agents() {
        let mut state = SystemState::new(Utc::now());
        state.agents.insert(
            "energy".to_string(),
            AgentSnapshot {
                name: "energy".to_string(),
                kind: AgentKind::Energy,
                status: AgentStatus::Active,
                focus: "Energy distribution".to_string(),
                state: AgentState::default(),
                metrics: Some(MetricsSnapshot::uniform(0.9)),
                baseline_coherence: Some(0.89),
            },
        );

        let summary = state.summary();
        assert!(summary.contains("System Health: Healthy"));
        assert!(summary.contains("Last Checkpoint: never"));
        assert!(summary.contains("energy: Active"));
        assert!(summary.contains("Coherence: 0.900"));
        assert_eq!(state.training_agent_count(), 1);
    }
}
