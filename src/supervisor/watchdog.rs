//! Failure detection for the coordinator loop
//!
//! Health is binary. A tick is degraded when the pluggable probe says so or
//! when any agent step failed or overran its deadline during that tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// System health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
        }
    }
}

/// External health probe consulted once per tick
#[cfg_attr(test, mockall::automock)]
pub trait HealthProbe: Send + Sync {
    fn probe(&self) -> HealthStatus;
}

/// Default probe
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysHealthy;

impl HealthProbe for AlwaysHealthy {
    fn probe(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

/// Failure history for one agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentHealth {
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Health checks for the coordinator loop
pub struct FailureDetector {
    probe: Arc<dyn HealthProbe>,
    agents: HashMap<String, AgentHealth>,
    /// Failures reported since the last health check
    pending: Vec<String>,
    status: HealthStatus,
}

impl FailureDetector {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            probe,
            agents: HashMap::new(),
            pending: Vec::new(),
            status: HealthStatus::Healthy,
        }
    }

    /// Detector with the always-healthy probe
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(AlwaysHealthy))
    }

    /// Record a failed or overrunning step
    pub fn report_step_failure(&mut self, agent: &str, error: &str, at: DateTime<Utc>) {
        let health = self.agents.entry(agent.to_string()).or_default();
        health.consecutive_failures += 1;
        health.total_failures += 1;
        health.last_error = Some(error.to_string());
        health.last_failure = Some(at);
        self.pending.push(agent.to_string());

        warn!(
            agent,
            error,
            consecutive = health.consecutive_failures,
            "Step failure reported"
        );
    }

    /// Record a successful step
    pub fn report_step_success(&mut self, agent: &str) {
        if let Some(health) = self.agents.get_mut(agent) {
            health.consecutive_failures = 0;
        }
    }

    /// Health for the tick just finished; clears the per-tick failure list
    pub fn check_system_health(&mut self) -> HealthStatus {
        let probed = self.probe.probe();
        let failed = std::mem::take(&mut self.pending);

        self.status = if probed.is_healthy() && failed.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        if !self.status.is_healthy() {
            debug!(probe = %probed, failed_agents = ?failed, "Health check degraded");
        }
        self.status
    }

    /// Result of the most recent check
    pub fn get_health_status(&self) -> HealthStatus {
        self.status
    }

    pub fn agent_health(&self, agent: &str) -> Option<&AgentHealth> {
        self.agents.get(agent)
    }
}

impl Default for FailureDetector {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_probe_is_healthy() {
        let mut detector = FailureDetector::with_defaults();
        assert_eq!(detector.check_system_health(), HealthStatus::Healthy);
        assert_eq!(detector.get_health_status().to_string(), "Healthy");
    }

    #[test]
    fn test_step_failure_degrades_one_check() {
        let mut detector = FailureDetector::with_defaults();
        detector.report_step_failure("energy", "producer exploded", Utc::now());

        assert_eq!(detector.check_system_health(), HealthStatus::Degraded);
        // Next tick starts clean
        assert_eq!(detector.check_system_health(), HealthStatus::Healthy);

        let health = detector.agent_health("energy").unwrap();
        assert_eq!(health.consecutive_failures, 1);
        assert_eq!(health.last_error.as_deref(), Some("producer exploded"));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut detector = FailureDetector::with_defaults();
        detector.report_step_failure("phase", "a", Utc::now());
        detector.report_step_failure("phase", "b", Utc::now());
        assert_eq!(detector.agent_health("phase").unwrap().consecutive_failures, 2);

        detector.report_step_success("phase");
        let health = detector.agent_health("phase").unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.total_failures, 2);
    }

    #[test]
    fn test_probe_degraded() {
        let mut probe = MockHealthProbe::new();
        probe.expect_probe().times(1).return_const(HealthStatus::Degraded);

        let mut detector = FailureDetector::new(Arc::new(probe));
        assert_eq!(detector.check_system_health(), HealthStatus::Degraded);
    }
}
