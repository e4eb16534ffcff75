use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::agents::TickOutcome;
use crate::config::AgentParams;
use crate::domain::MetricsSnapshot;
use crate::error::Result;

use super::export::{EventCategory, ExportFormat, MetricsExporter};
use super::observer::{Observer, ObserverEvent};

/// Coherence delta, relative to the last recorded peak, that counts as significant
pub const SIGNIFICANT_COHERENCE_DELTA: f64 = 0.05;

/// Turns tick outcomes into logged training events and observer notifications
pub struct MetricsAggregator {
    exporter: MetricsExporter,
    observer: Arc<dyn Observer>,
    ticks_logged: u64,
    significant_changes: u64,
    transitions_logged: u64,
}

impl MetricsAggregator {
    pub fn new(exporter: MetricsExporter, observer: Arc<dyn Observer>) -> Self {
        Self {
            exporter,
            observer,
            ticks_logged: 0,
            significant_changes: 0,
            transitions_logged: 0,
        }
    }

    pub fn exporter(&self) -> &MetricsExporter {
        &self.exporter
    }

    /// Log everything one agent's tick produced
    pub fn log_tick(
        &mut self,
        outcome: &TickOutcome,
        params: &AgentParams,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.observer.notify(&ObserverEvent::Tick {
            agent: outcome.agent.clone(),
            phase: outcome.phase,
            metrics: outcome.snapshot.clone(),
            validation_status: outcome.validation,
        });

        self.exporter.record(
            EventCategory::MetricsHistory,
            json!({
                "agent": outcome.agent,
                "phase": outcome.phase,
                "metrics": outcome.snapshot,
                "validation_status": outcome.validation,
            }),
            at,
        )?;
        self.ticks_logged += 1;

        if let Some(previous) = self.significant_change(&outcome.snapshot) {
            self.exporter.record(
                EventCategory::CoherencePeaks,
                json!({
                    "agent": outcome.agent,
                    "phase": outcome.phase,
                    "metrics": outcome.snapshot,
                }),
                at,
            )?;
            self.significant_changes += 1;
            self.observer.notify(&ObserverEvent::SignificantChange {
                agent: outcome.agent.clone(),
                phase: outcome.phase,
                metrics: outcome.snapshot.clone(),
                previous_coherence: previous,
            });
        }

        if let Some(transition) = &outcome.transition {
            self.exporter.record(
                EventCategory::PhaseTransitions,
                serde_json::to_value(transition)?,
                at,
            )?;
            self.transitions_logged += 1;
            self.observer
                .notify(&ObserverEvent::PhaseTransition(transition.clone()));
        }

        if outcome.adaptive {
            self.exporter.record(
                EventCategory::OptimizationPaths,
                json!({
                    "agent": outcome.agent,
                    "phase": outcome.phase,
                    "progress": outcome.progress,
                    "coherence": outcome.snapshot.coherence(),
                    "params": params,
                }),
                at,
            )?;
        }

        Ok(())
    }

    /// `Some(previous peak coherence)` when `snapshot` is a significant change.
    ///
    /// The very first coherence reading is always significant. Snapshots without
    /// a coherence value never are.
    fn significant_change(&self, snapshot: &MetricsSnapshot) -> Option<Option<f64>> {
        let coherence = snapshot.coherence()?;
        let last_peak = self
            .exporter
            .last_event(EventCategory::CoherencePeaks)
            .and_then(|event| event.payload.get("metrics"))
            .and_then(|metrics| metrics.get("coherence"))
            .and_then(|value| value.as_f64());

        match last_peak {
            None => Some(None),
            Some(peak) if (coherence - peak).abs() > SIGNIFICANT_COHERENCE_DELTA => Some(Some(peak)),
            Some(_) => None,
        }
    }

    /// Export all buckets and tell the observer
    pub async fn export(&self, format: ExportFormat, at: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let files = self.exporter.export(format, at).await?;
        self.observer.notify(&ObserverEvent::Exported {
            files: files.clone(),
        });
        Ok(files)
    }

    /// One-line counters for the periodic status log
    pub fn summary(&self) -> String {
        let counts = self.exporter.counts();
        debug!(?counts, "Event bucket sizes");
        format!(
            "ticks logged: {} | significant changes: {} | transitions: {}",
            self.ticks_logged, self.significant_changes, self.transitions_logged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentKind, PhaseTransition};
    use crate::domain::Phase;
    use crate::services::BroadcastObserver;
    use crate::validation::{Stability, ValidationStatus};

    fn outcome(agent: &str, coherence: f64, adaptive: bool) -> TickOutcome {
        TickOutcome {
            agent: agent.to_string(),
            kind: AgentKind::Coherence,
            phase: Phase::Discovery,
            snapshot: MetricsSnapshot::uniform(coherence),
            validation: ValidationStatus {
                phase: Phase::Discovery,
                meets_threshold: true,
                stability: Stability::Pending,
                variance: None,
                stability_counter: 1,
                required: 20,
                transition_ready: false,
            },
            transition: None,
            progress: 1,
            adaptive,
        }
    }

    fn aggregator() -> (MetricsAggregator, BroadcastObserver, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let observer = BroadcastObserver::new(64);
        let aggregator =
            MetricsAggregator::new(MetricsExporter::new(dir.path()), Arc::new(observer.clone()));
        (aggregator, observer, dir)
    }

    #[test]
    fn test_significant_change_tracks_last_peak() {
        let (mut agg, _observer, _dir) = aggregator();
        let params = AgentParams::default();
        let now = Utc::now();

        for c in [0.80, 0.84, 0.86, 0.83, 0.92] {
            agg.log_tick(&outcome("coherence", c, false), &params, now).unwrap();
        }

        let peaks: Vec<f64> = agg
            .exporter()
            .events(EventCategory::CoherencePeaks)
            .iter()
            .map(|e| e.payload["metrics"]["coherence"].as_f64().unwrap())
            .collect();
        // 0.84 and 0.83 stay within 0.05 of the previous peak
        assert_eq!(peaks, vec![0.80, 0.86, 0.92]);
        assert_eq!(agg.exporter().events(EventCategory::MetricsHistory).len(), 5);
    }

    #[test]
    fn test_snapshot_without_coherence_is_not_significant() {
        let (mut agg, _observer, _dir) = aggregator();
        let mut tick = outcome("energy", 0.9, false);
        tick.snapshot = MetricsSnapshot::new().with("energy", 0.9);
        agg.log_tick(&tick, &AgentParams::default(), Utc::now()).unwrap();
        assert!(agg.exporter().events(EventCategory::CoherencePeaks).is_empty());
    }

    #[test]
    fn test_adaptive_ticks_log_optimization_path() {
        let (mut agg, _observer, _dir) = aggregator();
        let params = AgentParams::default();
        agg.log_tick(&outcome("optimizer", 0.91, true), &params, Utc::now())
            .unwrap();
        agg.log_tick(&outcome("energy", 0.91, false), &params, Utc::now())
            .unwrap();

        let paths = agg.exporter().events(EventCategory::OptimizationPaths);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].payload["agent"], "optimizer");
        assert_eq!(paths[0].payload["params"]["hma_length"], 53);
    }

    #[tokio::test]
    async fn test_transition_is_logged_and_observed() {
        let (mut agg, observer, _dir) = aggregator();
        let mut rx = observer.subscribe();

        let mut tick = outcome("phase", 0.96, false);
        tick.transition = Some(PhaseTransition {
            agent: "phase".to_string(),
            from_phase: Phase::Discovery,
            to_phase: Phase::Refinement,
            final_metrics: MetricsSnapshot::uniform(0.96),
        });
        agg.log_tick(&tick, &AgentParams::default(), Utc::now()).unwrap();

        let logged = agg.exporter().events(EventCategory::PhaseTransitions);
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].payload["from_phase"], "discovery");

        let mut saw_transition = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ObserverEvent::PhaseTransition(_)) {
                saw_transition = true;
            }
        }
        assert!(saw_transition);
        assert!(agg.summary().contains("transitions: 1"));
    }
}
