//! Per-agent phase state machine
//!
//! One parameterized type serves every agent kind. The profile decides the
//! transition policy; the producer supplies the metrics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AgentParams;
use crate::domain::{MetricsSnapshot, Phase};
use crate::error::{PhaseGateError, Result};
use crate::validation::{StabilityValidator, StabilityWindow, ValidationStatus};

use super::profile::{AdaptiveRule, AgentKind, AgentProfile, TransitionPolicy};
use super::traits::{MetricsProducer, StepRequest};

/// Progress scale upper bound
pub const MAX_PROGRESS: u32 = 100;

/// Mutable state owned by exactly one state machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub phase: Phase,
    /// 0..=100, reset to 0 on every phase transition
    pub progress: u32,
    #[serde(flatten)]
    pub window: StabilityWindow,
}

/// Record of an agent leaving a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub agent: String,
    pub from_phase: Phase,
    pub to_phase: Phase,
    /// Last metrics observed in `from_phase`
    pub final_metrics: MetricsSnapshot,
}

/// Everything one tick produced for one agent
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub agent: String,
    pub kind: AgentKind,
    /// Phase the metrics were measured in
    pub phase: Phase,
    pub snapshot: MetricsSnapshot,
    pub validation: ValidationStatus,
    pub transition: Option<PhaseTransition>,
    /// Progress after the tick
    pub progress: u32,
    pub adaptive: bool,
}

/// Read-only view for status lines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingStatus {
    pub phase: Phase,
    pub progress: u32,
    pub focus: String,
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Phase ({}%)", self.phase.title(), self.progress)
    }
}

pub struct AgentStateMachine {
    name: String,
    profile: AgentProfile,
    producer: Arc<dyn MetricsProducer>,
    params: Arc<AgentParams>,
    validator: Arc<StabilityValidator>,
    state: AgentState,
    last_validation: Option<ValidationStatus>,
    last_metrics: Option<MetricsSnapshot>,
}

impl AgentStateMachine {
    pub fn new(
        name: impl Into<String>,
        profile: AgentProfile,
        producer: Arc<dyn MetricsProducer>,
        params: Arc<AgentParams>,
        validator: Arc<StabilityValidator>,
    ) -> Self {
        Self {
            name: name.into(),
            profile,
            producer,
            params,
            validator,
            state: AgentState::default(),
            last_validation: None,
            last_metrics: None,
        }
    }

    /// Machine for a built-in kind with its default producer
    pub fn for_kind(
        kind: AgentKind,
        params: Arc<AgentParams>,
        validator: Arc<StabilityValidator>,
    ) -> Self {
        Self::new(
            kind.as_str(),
            kind.profile(),
            kind.default_producer(),
            params,
            validator,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AgentKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn progress(&self) -> u32 {
        self.state.progress
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn last_validation(&self) -> Option<&ValidationStatus> {
        self.last_validation.as_ref()
    }

    pub fn last_metrics(&self) -> Option<&MetricsSnapshot> {
        self.last_metrics.as_ref()
    }

    fn request(&self) -> StepRequest<'_> {
        StepRequest {
            agent: &self.name,
            kind: self.profile.kind,
            phase: self.state.phase,
            progress: self.state.progress,
            params: &self.params,
        }
    }

    async fn sample(&self) -> Result<MetricsSnapshot> {
        let snapshot = self
            .producer
            .produce(self.request())
            .await
            .map_err(|e| match e {
                PhaseGateError::Step { .. } | PhaseGateError::StepTimeout { .. } => e,
                other => PhaseGateError::Step {
                    agent: self.name.clone(),
                    reason: other.to_string(),
                },
            })?;

        if let Some((name, value)) = snapshot.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PhaseGateError::Step {
                agent: self.name.clone(),
                reason: format!("metric {name} is not finite ({value})"),
            });
        }
        Ok(snapshot)
    }

    /// Baseline sample used during initialization; does not touch the state
    pub async fn baseline(&self) -> Result<MetricsSnapshot> {
        self.sample().await
    }

    /// Run one producer step and remember its metrics
    pub async fn train_step(&mut self) -> Result<MetricsSnapshot> {
        let snapshot = self.sample().await?;
        self.last_metrics = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Feed `snapshot` to the stability validator for the current phase
    pub fn validate(&mut self, snapshot: &MetricsSnapshot) -> ValidationStatus {
        let status =
            self.validator
                .check_phase_completion(&mut self.state.window, snapshot, self.state.phase);
        self.last_validation = Some(status);
        status
    }

    /// Apply the transition policy once.
    ///
    /// Threshold-gated agents consult the latest validation result. Adaptive
    /// agents run a fresh train step and decide on its coherence.
    pub async fn advance_phase(&mut self) -> Result<Option<PhaseTransition>> {
        match self.profile.policy {
            TransitionPolicy::ThresholdGated => Ok(self.apply_threshold_gate()),
            TransitionPolicy::Adaptive(rule) => {
                let snapshot = self.train_step().await?;
                Ok(self.apply_adaptive(&rule, &snapshot))
            }
        }
    }

    /// One full tick: train step, validation, transition policy
    pub async fn step(&mut self) -> Result<TickOutcome> {
        let phase = self.state.phase;
        let snapshot = self.train_step().await?;
        let validation = self.validate(&snapshot);

        let transition = match self.profile.policy {
            TransitionPolicy::ThresholdGated => {
                self.bump_progress(1);
                self.apply_threshold_gate()
            }
            TransitionPolicy::Adaptive(rule) => self.apply_adaptive(&rule, &snapshot),
        };

        debug!(
            agent = %self.name,
            phase = %phase,
            progress = self.state.progress,
            counter = validation.stability_counter,
            ready = validation.transition_ready,
            "Agent step complete"
        );

        Ok(TickOutcome {
            agent: self.name.clone(),
            kind: self.profile.kind,
            phase,
            snapshot,
            validation,
            transition,
            progress: self.state.progress,
            adaptive: self.profile.policy.is_adaptive(),
        })
    }

    pub fn get_training_status(&self) -> TrainingStatus {
        TrainingStatus {
            phase: self.state.phase,
            progress: self.state.progress.min(MAX_PROGRESS),
            focus: self.profile.focus(self.state.phase).to_string(),
        }
    }

    fn bump_progress(&mut self, by: u32) {
        self.state.progress = (self.state.progress + by).min(MAX_PROGRESS);
    }

    fn apply_threshold_gate(&mut self) -> Option<PhaseTransition> {
        let ready = self
            .last_validation
            .map(|status| status.phase == self.state.phase && status.transition_ready)
            .unwrap_or(false);
        if ready {
            self.enter_next_phase()
        } else {
            None
        }
    }

    fn apply_adaptive(
        &mut self,
        rule: &AdaptiveRule,
        snapshot: &MetricsSnapshot,
    ) -> Option<PhaseTransition> {
        let coherence = snapshot.coherence().unwrap_or(0.0);

        let overridden = rule
            .override_for(self.state.phase)
            .map(|threshold| coherence > threshold)
            .unwrap_or(false);

        if !self.state.phase.is_terminal() && (overridden || self.state.progress >= MAX_PROGRESS) {
            return self.enter_next_phase();
        }

        self.bump_progress(rule.increment_for(coherence));
        None
    }

    fn enter_next_phase(&mut self) -> Option<PhaseTransition> {
        let from_phase = self.state.phase;
        let to_phase = from_phase.next()?;

        self.state.phase = to_phase;
        self.state.progress = 0;
        self.state.window.reset();

        info!(
            agent = %self.name,
            from = %from_phase,
            to = %to_phase,
            "Phase transition"
        );

        Some(PhaseTransition {
            agent: self.name.clone(),
            from_phase,
            to_phase,
            final_metrics: self.last_metrics.clone().unwrap_or_default(),
        })
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}

impl fmt::Debug for AgentStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentStateMachine")
            .field("name", &self.name)
            .field("kind", &self.profile.kind)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::FnProducer;
    use crate::domain::CriteriaTable;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn constant(value: f64) -> Arc<dyn MetricsProducer> {
        Arc::new(FnProducer::new(move |_req: &StepRequest<'_>| {
            Ok(MetricsSnapshot::uniform(value))
        }))
    }

    fn machine(kind: AgentKind, producer: Arc<dyn MetricsProducer>) -> AgentStateMachine {
        AgentStateMachine::new(
            kind.as_str(),
            kind.profile(),
            producer,
            Arc::new(AgentParams::default()),
            Arc::new(StabilityValidator::with_defaults()),
        )
    }

    #[tokio::test]
    async fn test_threshold_gated_transitions_when_counter_reaches_count() {
        let mut agent = machine(AgentKind::Coherence, constant(0.9));

        for tick in 1..20 {
            let outcome = agent.step().await.unwrap();
            assert!(outcome.transition.is_none(), "tick {tick}");
            assert_eq!(agent.progress(), tick);
        }

        let outcome = agent.step().await.unwrap();
        let transition = outcome.transition.expect("tick 20 transitions");
        assert_eq!(transition.from_phase, Phase::Discovery);
        assert_eq!(transition.to_phase, Phase::Refinement);
        assert_eq!(transition.final_metrics, MetricsSnapshot::uniform(0.9));
        assert_eq!(agent.phase(), Phase::Refinement);
        assert_eq!(agent.progress(), 0);
        assert_eq!(agent.state().window.history_len(), 0);
    }

    #[tokio::test]
    async fn test_threshold_gated_stops_at_terminal_phase() {
        let mut criteria = CriteriaTable::default();
        criteria.discovery.stability_count = 3;
        criteria.refinement.stability_count = 3;
        criteria.validation.stability_count = 3;

        let mut agent = AgentStateMachine::new(
            "energy",
            AgentKind::Energy.profile(),
            constant(0.99),
            Arc::new(AgentParams::default()),
            Arc::new(StabilityValidator::new(criteria)),
        );

        let mut transitions = 0;
        for _ in 0..150 {
            if agent.step().await.unwrap().transition.is_some() {
                transitions += 1;
            }
            assert!(agent.progress() <= MAX_PROGRESS);
        }

        assert_eq!(transitions, 2);
        assert_eq!(agent.phase(), Phase::Validation);
        assert_eq!(agent.progress(), MAX_PROGRESS);
        assert!(agent.advance_phase().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_adaptive_override_transitions_early() {
        let mut agent = machine(AgentKind::Optimizer, constant(0.96));
        agent.state_mut().progress = 50;

        let transition = agent.advance_phase().await.unwrap().expect("override fires");
        assert_eq!(transition.to_phase, Phase::Refinement);
        assert_eq!(agent.phase(), Phase::Refinement);
        assert_eq!(agent.progress(), 0);

        // 0.96 is below the refinement override
        assert!(agent.advance_phase().await.unwrap().is_none());
        assert_eq!(agent.progress(), 2);
    }

    #[tokio::test]
    async fn test_adaptive_refinement_override_reaches_validation() {
        let mut agent = machine(AgentKind::Optimizer, constant(0.985));
        agent.state_mut().phase = Phase::Refinement;
        agent.state_mut().progress = 10;

        let transition = agent.advance_phase().await.unwrap().expect("override fires");
        assert_eq!(transition.from_phase, Phase::Refinement);
        assert_eq!(transition.to_phase, Phase::Validation);
        assert_eq!(agent.progress(), 0);
    }

    #[tokio::test]
    async fn test_adaptive_thresholds_are_strict() {
        // Exactly at the discovery override: no transition, fast increment
        let mut at_override = machine(AgentKind::Optimizer, constant(0.95));
        assert!(at_override.advance_phase().await.unwrap().is_none());
        assert_eq!(at_override.phase(), Phase::Discovery);
        assert_eq!(at_override.progress(), 2);

        // Exactly at the fast-progress bound: normal increment
        let mut at_fast = machine(AgentKind::Optimizer, constant(0.90));
        assert!(at_fast.advance_phase().await.unwrap().is_none());
        assert_eq!(at_fast.progress(), 1);
    }

    #[tokio::test]
    async fn test_adaptive_progress_increments() {
        let mut fast = machine(AgentKind::Optimizer, constant(0.92));
        fast.step().await.unwrap();
        assert_eq!(fast.progress(), 2);

        let mut slow = machine(AgentKind::Optimizer, constant(0.80));
        slow.step().await.unwrap();
        assert_eq!(slow.progress(), 1);
    }

    #[tokio::test]
    async fn test_adaptive_advances_at_full_progress_and_stays_terminal() {
        let mut agent = machine(AgentKind::Optimizer, constant(0.91));

        let mut seen = Vec::new();
        for _ in 0..200 {
            let outcome = agent.step().await.unwrap();
            assert!(outcome.progress <= MAX_PROGRESS);
            if let Some(t) = outcome.transition {
                seen.push(t.to_phase);
            }
        }

        assert_eq!(seen, vec![Phase::Refinement, Phase::Validation]);
        assert_eq!(agent.phase(), Phase::Validation);
    }

    #[tokio::test]
    async fn test_adaptive_terminal_ignores_coherence() {
        let mut agent = machine(AgentKind::Optimizer, constant(0.999));
        agent.state_mut().phase = Phase::Validation;
        for _ in 0..5 {
            assert!(agent.advance_phase().await.unwrap().is_none());
        }
        assert_eq!(agent.phase(), Phase::Validation);
    }

    #[tokio::test]
    async fn test_producer_sees_progress_and_phase() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let producer = Arc::new(FnProducer::new(move |req: &StepRequest<'_>| {
            assert_eq!(req.agent, "coherence");
            assert_eq!(req.params.wavelet_base, 17);
            assert_eq!(req.progress, seen.fetch_add(1, Ordering::SeqCst));
            Ok(MetricsSnapshot::uniform(0.5))
        }));

        let mut agent = machine(AgentKind::Coherence, producer);
        for _ in 0..3 {
            agent.step().await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_finite_metric_is_step_error() {
        let mut agent = machine(AgentKind::Energy, constant(f64::NAN));
        let err = agent.step().await.unwrap_err();
        assert!(matches!(err, PhaseGateError::Step { ref agent, .. } if agent == "energy"));
        assert_eq!(agent.progress(), 0);
    }

    #[tokio::test]
    async fn test_producer_error_is_wrapped_as_step_error() {
        let producer = Arc::new(FnProducer::new(|_req: &StepRequest<'_>| {
            Err(PhaseGateError::Persistence("feed offline".to_string()))
        }));
        let mut agent = machine(AgentKind::Phase, producer);
        match agent.step().await.unwrap_err() {
            PhaseGateError::Step { agent, reason } => {
                assert_eq!(agent, "phase");
                assert!(reason.contains("feed offline"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_training_status_line() {
        let mut agent = machine(AgentKind::Optimizer, constant(0.92));
        for _ in 0..21 {
            agent.step().await.unwrap();
        }
        let status = agent.get_training_status();
        assert_eq!(status.progress, 42);
        assert_eq!(status.focus, "Parameter space exploration");
        assert_eq!(status.to_string(), "Discovery Phase (42%)");
    }

    #[tokio::test]
    async fn test_baseline_does_not_mutate() {
        let agent = machine(AgentKind::Coherence, constant(0.93));
        let baseline = agent.baseline().await.unwrap();
        assert_eq!(baseline.coherence(), Some(0.93));
        assert!(agent.last_metrics().is_none());
        assert_eq!(agent.state(), &AgentState::default());
    }

    #[test]
    fn test_agent_state_serializes_flat() {
        let json = serde_json::to_value(AgentState::default()).unwrap();
        assert_eq!(json["phase"], "discovery");
        assert_eq!(json["stability_counter"], 0);
        assert!(json["metric_history"].as_array().unwrap().is_empty());
    }
}
