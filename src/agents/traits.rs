//! Agent step producer seam
//!
//! The coordinator never synthesizes metrics itself. Each agent is given a
//! producer that returns a fresh `MetricsSnapshot` for the agent's current
//! phase and progress.

use async_trait::async_trait;

use crate::config::AgentParams;
use crate::domain::{MetricsSnapshot, Phase};
use crate::error::Result;

use super::profile::AgentKind;

/// Everything a producer may look at when computing one step
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub agent: &'a str,
    pub kind: AgentKind,
    pub phase: Phase,
    pub progress: u32,
    pub params: &'a AgentParams,
}

/// Agent step producer (train step)
#[async_trait]
pub trait MetricsProducer: Send + Sync {
    /// Produce the metrics for one step
    async fn produce(&self, request: StepRequest<'_>) -> Result<MetricsSnapshot>;
}

/// Adapter turning a plain closure into a producer
pub struct FnProducer<F> {
    f: F,
}

impl<F> FnProducer<F>
where
    F: Fn(&StepRequest<'_>) -> Result<MetricsSnapshot> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MetricsProducer for FnProducer<F>
where
    F: Fn(&StepRequest<'_>) -> Result<MetricsSnapshot> + Send + Sync,
{
    async fn produce(&self, request: StepRequest<'_>) -> Result<MetricsSnapshot> {
        (self.f)(&request)
    }
}
