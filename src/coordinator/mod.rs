//! Multi-Agent Coordinator
//!
//! Central orchestrator that drives every agent state machine through its
//! phases on a fixed tick, persists checkpoints, and recovers from degraded
//! health.

pub mod bootstrap;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod state;

pub use bootstrap::{build_coordinator, start, RunOptions};
pub use command::CoordinatorControlCommand;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle, RunSummary};
pub use state::{AgentSnapshot, AgentStatus, CoordinatorState, SystemState};
