//! Supervisor Layer for failure detection and recovery
//!
//! - Failure detector: per-tick binary health from a probe and reported step failures
//! - Recovery system: single-flight stabilize action

pub mod playbook;
pub mod watchdog;

pub use playbook::{
    NoopRecovery, RecoveryHandler, RecoveryStatus, RecoverySystem, StabilizeOutcome,
};
pub use watchdog::{AgentHealth, AlwaysHealthy, FailureDetector, HealthProbe, HealthStatus};
