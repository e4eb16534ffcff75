//! Core domain types: phases, phase criteria and metric snapshots

pub mod metrics;
pub mod phase;

pub use metrics::MetricsSnapshot;
pub use phase::{CriteriaTable, Phase, PhaseCriteria};
