//! Per-kind agent profiles
//!
//! All agents share one state machine; what differs between kinds is captured
//! here: the focus label, the transition policy, initialization prerequisites
//! and the default producer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::metrics::{COHERENCE, ENERGY, PHASE};
use crate::domain::Phase;
use crate::error::PhaseGateError;

use super::producers::{MetricRamp, PhasedRampProducer, RampProducer};
use super::traits::MetricsProducer;

/// Built-in agent kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coherence,
    Phase,
    Energy,
    Optimizer,
    Coordinator,
}

impl AgentKind {
    /// Default start-up order
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Coherence,
        AgentKind::Phase,
        AgentKind::Energy,
        AgentKind::Optimizer,
        AgentKind::Coordinator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Coherence => "coherence",
            AgentKind::Phase => "phase",
            AgentKind::Energy => "energy",
            AgentKind::Optimizer => "optimizer",
            AgentKind::Coordinator => "coordinator",
        }
    }

    /// Profile with the kind's focus, policy, prerequisites and default producer
    pub fn profile(&self) -> AgentProfile {
        match self {
            AgentKind::Coherence => AgentProfile::threshold_gated(*self, "Coherence optimization"),
            AgentKind::Phase => AgentProfile::threshold_gated(*self, "Phase alignment").requires(
                InitRequirement::MinBaselineCoherence {
                    agent: AgentKind::Coherence.as_str().to_string(),
                    min: 0.9,
                },
            ),
            AgentKind::Energy => AgentProfile::threshold_gated(*self, "Energy distribution"),
            AgentKind::Optimizer => AgentProfile {
                kind: *self,
                focus: [
                    "Parameter space exploration".to_string(),
                    "Fine-tuning correlations".to_string(),
                    "Cross-timeframe confirmation".to_string(),
                ],
                policy: TransitionPolicy::Adaptive(AdaptiveRule::default()),
                init: InitRequirement::None,
            },
            AgentKind::Coordinator => AgentProfile::threshold_gated(*self, "System coordination"),
        }
    }

    /// Placeholder metric synthesis for this kind
    pub fn default_producer(&self) -> Arc<dyn MetricsProducer> {
        match self {
            AgentKind::Coherence => Arc::new(RampProducer::linear(0.95, 0.85, 0.78)),
            AgentKind::Phase => Arc::new(RampProducer::linear(0.92, 0.88, 0.82)),
            AgentKind::Energy => Arc::new(RampProducer::linear(0.89, 0.91, 0.85)),
            AgentKind::Coordinator => Arc::new(RampProducer::linear(0.94, 0.89, 0.86)),
            AgentKind::Optimizer => Arc::new(PhasedRampProducer::new([
                RampProducer::new(vec![
                    MetricRamp::new(COHERENCE, 0.75, 0.0005, 0.95),
                    MetricRamp::new(ENERGY, 0.70, 0.0004, 0.93),
                    MetricRamp::new(PHASE, 0.65, 0.0003, 0.92),
                ]),
                RampProducer::new(vec![
                    MetricRamp::new(COHERENCE, 0.80, 0.0003, 0.97),
                    MetricRamp::new(ENERGY, 0.75, 0.0002, 0.95),
                    MetricRamp::new(PHASE, 0.70, 0.0002, 0.94),
                ]),
                RampProducer::new(vec![
                    MetricRamp::new(COHERENCE, 0.85, 0.0001, 0.98),
                    MetricRamp::new(ENERGY, 0.80, 0.0001, 0.96),
                    MetricRamp::new(PHASE, 0.75, 0.0001, 0.95),
                ]),
            ])),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coherence" => Ok(AgentKind::Coherence),
            "phase" => Ok(AgentKind::Phase),
            "energy" => Ok(AgentKind::Energy),
            "optimizer" => Ok(AgentKind::Optimizer),
            "coordinator" => Ok(AgentKind::Coordinator),
            other => Err(PhaseGateError::Configuration(format!(
                "unknown agent kind: {other}"
            ))),
        }
    }
}

/// Coherence-driven transition rule for adaptive agents
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveRule {
    /// `discovery -> refinement` fires when coherence exceeds this
    pub discovery_override: f64,
    /// `refinement -> validation` fires when coherence exceeds this
    pub refinement_override: f64,
    /// Above this coherence progress moves by `fast_increment`
    pub fast_progress_above: f64,
    pub fast_increment: u32,
    pub normal_increment: u32,
}

impl AdaptiveRule {
    /// Early-transition threshold for `phase`; none at the terminal phase
    pub fn override_for(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::Discovery => Some(self.discovery_override),
            Phase::Refinement => Some(self.refinement_override),
            Phase::Validation => None,
        }
    }

    pub fn increment_for(&self, coherence: f64) -> u32 {
        if coherence > self.fast_progress_above {
            self.fast_increment
        } else {
            self.normal_increment
        }
    }
}

impl Default for AdaptiveRule {
    fn default() -> Self {
        Self {
            discovery_override: 0.95,
            refinement_override: 0.98,
            fast_progress_above: 0.90,
            fast_increment: 2,
            normal_increment: 1,
        }
    }
}

/// How an agent decides to leave its current phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Advance when the stability validator reports the phase complete
    ThresholdGated,
    /// Advance on coherence overrides or once progress reaches 100
    Adaptive(AdaptiveRule),
}

impl TransitionPolicy {
    pub fn is_adaptive(&self) -> bool {
        matches!(self, TransitionPolicy::Adaptive(_))
    }
}

/// Prerequisite checked before an agent is initialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitRequirement {
    None,
    /// Another agent must already be initialized with a baseline coherence of at least `min`
    MinBaselineCoherence { agent: String, min: f64 },
}

/// Kind-specific configuration record for one agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub kind: AgentKind,
    /// Focus label per phase, indexed discovery/refinement/validation
    pub focus: [String; 3],
    pub policy: TransitionPolicy,
    pub init: InitRequirement,
}

impl AgentProfile {
    /// Threshold-gated profile with one focus label for every phase
    pub fn threshold_gated(kind: AgentKind, focus: &str) -> Self {
        Self {
            kind,
            focus: [focus.to_string(), focus.to_string(), focus.to_string()],
            policy: TransitionPolicy::ThresholdGated,
            init: InitRequirement::None,
        }
    }

    pub fn requires(mut self, requirement: InitRequirement) -> Self {
        self.init = requirement;
        self
    }

    pub fn focus(&self, phase: Phase) -> &str {
        match phase {
            Phase::Discovery => &self.focus[0],
            Phase::Refinement => &self.focus[1],
            Phase::Validation => &self.focus[2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.as_str().parse::<AgentKind>().unwrap(), kind);
        }
        assert!(matches!(
            "gravity".parse::<AgentKind>(),
            Err(PhaseGateError::Configuration(_))
        ));
    }

    #[test]
    fn test_only_optimizer_is_adaptive() {
        for kind in AgentKind::ALL {
            let adaptive = kind.profile().policy.is_adaptive();
            assert_eq!(adaptive, kind == AgentKind::Optimizer, "{kind}");
        }
    }

    #[test]
    fn test_phase_agent_requires_coherence_baseline() {
        let profile = AgentKind::Phase.profile();
        assert_eq!(
            profile.init,
            InitRequirement::MinBaselineCoherence {
                agent: "coherence".to_string(),
                min: 0.9
            }
        );
    }

    #[test]
    fn test_optimizer_focus_changes_per_phase() {
        let profile = AgentKind::Optimizer.profile();
        assert_eq!(profile.focus(Phase::Discovery), "Parameter space exploration");
        assert_eq!(profile.focus(Phase::Validation), "Cross-timeframe confirmation");
    }

    #[test]
    fn test_adaptive_rule_thresholds() {
        let rule = AdaptiveRule::default();
        assert_eq!(rule.override_for(Phase::Discovery), Some(0.95));
        assert_eq!(rule.override_for(Phase::Refinement), Some(0.98));
        assert_eq!(rule.override_for(Phase::Validation), None);
        assert_eq!(rule.increment_for(0.91), 2);
        assert_eq!(rule.increment_for(0.90), 1);
    }
}
