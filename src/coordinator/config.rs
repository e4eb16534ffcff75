//! Coordinator Configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::agents::AgentKind;

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Time between the start of consecutive ticks (ms)
    pub tick_interval_ms: u64,
    /// Deadline for a single agent step (ms); overrun counts as a step failure
    pub step_timeout_ms: u64,
    /// Log the system summary every N ticks; 0 disables it
    pub status_log_every_ticks: u64,
    /// Agents to start, in initialization order
    pub agents: Vec<String>,
    /// Stop after this many checkpoint/export writes fail in a row
    pub max_consecutive_persistence_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            step_timeout_ms: 5000,
            status_log_every_ticks: 10,
            agents: AgentKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            max_consecutive_persistence_failures: 5,
        }
    }
}

impl CoordinatorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Configured agent kinds, in order
    pub fn agent_kinds(&self) -> crate::error::Result<Vec<AgentKind>> {
        self.agents.iter().map(|name| name.parse()).collect()
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.tick_interval_ms == 0 {
            errors.push("coordinator.tick_interval_ms must be positive".to_string());
        }
        if self.step_timeout_ms == 0 {
            errors.push("coordinator.step_timeout_ms must be positive".to_string());
        }
        if self.max_consecutive_persistence_failures == 0 {
            errors.push(
                "coordinator.max_consecutive_persistence_failures must be at least 1".to_string(),
            );
        }
        if self.agents.is_empty() {
            errors.push("coordinator.agents must name at least one agent".to_string());
        }

        let mut seen = HashSet::new();
        for name in &self.agents {
            if let Err(e) = name.parse::<AgentKind>() {
                errors.push(format!("coordinator.agents: {e}"));
            } else if !seen.insert(name.as_str()) {
                errors.push(format!("coordinator.agents: duplicate agent {name}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_starts_all_kinds_in_order() {
        let config = CoordinatorConfig::default();
        assert_eq!(
            config.agents,
            vec!["coherence", "phase", "energy", "optimizer", "coordinator"]
        );
        assert_eq!(config.agent_kinds().unwrap()[1], AgentKind::Phase);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_agents_rejected() {
        let config = CoordinatorConfig {
            agents: vec!["energy".to_string(), "energy".to_string()],
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("duplicate"));
    }
}
