pub mod agents;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod services;
pub mod supervisor;
pub mod validation;

pub use agents::{AgentKind, AgentProfile, AgentStateMachine, FnProducer, MetricsProducer};
pub use config::AppConfig;
pub use coordination::{Clock, GracefulShutdown, ManualClock, ShutdownSignal, SystemClock};
pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorState, RunSummary};
pub use domain::{CriteriaTable, MetricsSnapshot, Phase, PhaseCriteria};
pub use error::{PhaseGateError, Result};
pub use persistence::{CheckpointConfig, CheckpointManager, Checkpointable};
pub use services::{ExportFormat, MetricsAggregator, MetricsExporter, Observer, ObserverEvent};
pub use supervisor::{FailureDetector, HealthStatus, RecoveryStatus, RecoverySystem};
pub use validation::{StabilityValidator, ValidationStatus};
