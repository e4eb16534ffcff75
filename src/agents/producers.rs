//! Default metric producers
//!
//! Placeholder synthesis: every metric ramps linearly with progress up to a
//! cap. Real deployments inject their own `MetricsProducer`.

use async_trait::async_trait;

use crate::domain::metrics::{COHERENCE, ENERGY, PHASE};
use crate::domain::{MetricsSnapshot, Phase};
use crate::error::Result;

use super::traits::{MetricsProducer, StepRequest};

/// Slope applied by the simple per-kind ramps
const DEFAULT_SLOPE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRamp {
    pub name: &'static str,
    pub base: f64,
    pub slope: f64,
    pub cap: f64,
}

impl MetricRamp {
    pub fn new(name: &'static str, base: f64, slope: f64, cap: f64) -> Self {
        Self {
            name,
            base,
            slope,
            cap,
        }
    }

    fn value_at(&self, progress: u32) -> f64 {
        (self.base + self.slope * f64::from(progress)).min(self.cap)
    }
}

/// Metrics that grow with progress, independent of phase
#[derive(Debug, Clone)]
pub struct RampProducer {
    ramps: Vec<MetricRamp>,
}

impl RampProducer {
    pub fn new(ramps: Vec<MetricRamp>) -> Self {
        Self { ramps }
    }

    /// Standard coherence/energy/phase ramp, capped at 1.0
    pub fn linear(coherence: f64, energy: f64, phase: f64) -> Self {
        Self::new(vec![
            MetricRamp::new(COHERENCE, coherence, DEFAULT_SLOPE, 1.0),
            MetricRamp::new(ENERGY, energy, DEFAULT_SLOPE, 1.0),
            MetricRamp::new(PHASE, phase, DEFAULT_SLOPE, 1.0),
        ])
    }

    pub fn sample(&self, progress: u32) -> MetricsSnapshot {
        self.ramps
            .iter()
            .map(|ramp| (ramp.name, ramp.value_at(progress)))
            .collect()
    }
}

#[async_trait]
impl MetricsProducer for RampProducer {
    async fn produce(&self, request: StepRequest<'_>) -> Result<MetricsSnapshot> {
        Ok(self.sample(request.progress))
    }
}

/// A different ramp for each phase
#[derive(Debug, Clone)]
pub struct PhasedRampProducer {
    by_phase: [RampProducer; 3],
}

impl PhasedRampProducer {
    /// Ramps indexed discovery/refinement/validation
    pub fn new(by_phase: [RampProducer; 3]) -> Self {
        Self { by_phase }
    }

    fn ramp(&self, phase: Phase) -> &RampProducer {
        match phase {
            Phase::Discovery => &self.by_phase[0],
            Phase::Refinement => &self.by_phase[1],
            Phase::Validation => &self.by_phase[2],
        }
    }
}

#[async_trait]
impl MetricsProducer for PhasedRampProducer {
    async fn produce(&self, request: StepRequest<'_>) -> Result<MetricsSnapshot> {
        Ok(self.ramp(request.phase).sample(request.progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentKind;
    use crate::config::AgentParams;

    fn request(phase: Phase, progress: u32, params: &AgentParams) -> StepRequest<'_> {
        StepRequest {
            agent: "test",
            kind: AgentKind::Optimizer,
            phase,
            progress,
            params,
        }
    }

    #[test]
    fn test_linear_ramp_is_capped_at_one() {
        let producer = RampProducer::linear(0.95, 0.85, 0.78);
        let early = producer.sample(10);
        assert!((early.coherence().unwrap() - 0.96).abs() < 1e-9);

        let late = producer.sample(500);
        assert_eq!(late.coherence(), Some(1.0));
        assert!(late.values().all(|v| v <= 1.0));
    }

    #[tokio::test]
    async fn test_phased_ramp_uses_phase_specific_curve() {
        let params = AgentParams::default();
        let producer = AgentKind::Optimizer.default_producer();

        let discovery = producer
            .produce(request(Phase::Discovery, 0, &params))
            .await
            .unwrap();
        let validation = producer
            .produce(request(Phase::Validation, 0, &params))
            .await
            .unwrap();

        assert_eq!(discovery.coherence(), Some(0.75));
        assert_eq!(validation.coherence(), Some(0.85));

        let capped = producer
            .produce(request(Phase::Discovery, 10_000, &params))
            .await
            .unwrap();
        assert_eq!(capped.coherence(), Some(0.95));
    }
}
