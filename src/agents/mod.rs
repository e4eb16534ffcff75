//! Phase-gated agents
//!
//! Every agent is an `AgentStateMachine` parameterized by an `AgentProfile`.
//! Metrics come from an injected `MetricsProducer`.

pub mod producers;
pub mod profile;
pub mod state_machine;
pub mod traits;

pub use producers::{MetricRamp, PhasedRampProducer, RampProducer};
pub use profile::{AdaptiveRule, AgentKind, AgentProfile, InitRequirement, TransitionPolicy};
pub use state_machine::{
    AgentState, AgentStateMachine, PhaseTransition, TickOutcome, TrainingStatus, MAX_PROGRESS,
};
pub use traits::{FnProducer, MetricsProducer, StepRequest};
