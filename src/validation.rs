//! Stability validation for phase completion
//!
//! A phase is complete once an agent's metrics have stayed above the phase's
//! threshold, with a bounded short-term spread, for a required number of
//! consecutive observations.
//!
//! The spread is measured over the most recent [`VARIANCE_WINDOW`] observations.
//! While fewer observations exist the stability verdict is *pending*: a
//! qualifying observation still extends the streak, but the phase cannot be
//! reported complete until the spread has actually been measured.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::domain::{CriteriaTable, MetricsSnapshot, Phase, PhaseCriteria};

/// Number of most recent observations used to bound short-term fluctuation
pub const VARIANCE_WINDOW: usize = 3;

/// Rolling per-agent state consumed by the validator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityWindow {
    /// Consecutive qualifying observations, saturating at the phase's `stability_count`
    pub stability_counter: u32,
    /// Bounded FIFO of recent snapshots, capacity = current phase's `stability_count`
    pub metric_history: VecDeque<MetricsSnapshot>,
}

impl StabilityWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; used when the agent enters a new phase
    pub fn reset(&mut self) {
        self.stability_counter = 0;
        self.metric_history.clear();
    }

    pub fn history_len(&self) -> usize {
        self.metric_history.len()
    }

    fn push(&mut self, snapshot: MetricsSnapshot, capacity: usize) {
        self.metric_history.push_back(snapshot);
        while self.metric_history.len() > capacity {
            self.metric_history.pop_front();
        }
    }
}

/// Short-term stability verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    /// Fewer than [`VARIANCE_WINDOW`] observations so far
    Pending,
    Stable,
    Unstable,
}

impl Stability {
    pub fn is_stable(&self) -> bool {
        matches!(self, Stability::Stable)
    }
}

/// Outcome of one validation step, reported to the observer every tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatus {
    pub phase: Phase,
    pub meets_threshold: bool,
    pub stability: Stability,
    /// Max per-metric spread over the variance window, once measurable
    pub variance: Option<f64>,
    pub stability_counter: u32,
    pub required: u32,
    /// The phase's completion criteria are satisfied on this tick
    pub transition_ready: bool,
}

/// Decides phase completion from a phase's criteria and an agent's rolling history
#[derive(Debug, Clone)]
pub struct StabilityValidator {
    criteria: CriteriaTable,
}

impl StabilityValidator {
    pub fn new(criteria: CriteriaTable) -> Self {
        Self { criteria }
    }

    /// Validator using the default criteria table
    pub fn with_defaults() -> Self {
        Self::new(CriteriaTable::default())
    }

    pub fn criteria(&self, phase: Phase) -> &PhaseCriteria {
        self.criteria.get(phase)
    }

    /// Record `snapshot` and report whether `phase` is now complete
    pub fn check_phase_completion(
        &self,
        window: &mut StabilityWindow,
        snapshot: &MetricsSnapshot,
        phase: Phase,
    ) -> ValidationStatus {
        let criteria = self.criteria(phase);
        let required = criteria.stability_count;

        window.push(snapshot.clone(), required as usize);

        let meets_threshold = Self::meets_threshold(snapshot, criteria);

        let variance = Self::window_variance(&window.metric_history);
        let stability = match variance {
            None => Stability::Pending,
            Some(v) if v <= criteria.max_variance => Stability::Stable,
            Some(_) => Stability::Unstable,
        };

        let qualifies = meets_threshold && stability != Stability::Unstable;
        if qualifies {
            window.stability_counter = (window.stability_counter + 1).min(required);
        } else {
            window.stability_counter = 0;
        }

        let transition_ready =
            stability != Stability::Pending && window.stability_counter >= required;

        ValidationStatus {
            phase,
            meets_threshold,
            stability,
            variance,
            stability_counter: window.stability_counter,
            required,
            transition_ready,
        }
    }

    /// Every metric must reach the phase threshold; an empty snapshot never does
    fn meets_threshold(snapshot: &MetricsSnapshot, criteria: &PhaseCriteria) -> bool {
        !snapshot.is_empty()
            && snapshot
                .values()
                .all(|value| value >= criteria.min_threshold)
    }

    /// Largest max-min spread of any metric over the last [`VARIANCE_WINDOW`] entries.
    ///
    /// Returns `None` while the history is shorter than the window. A metric that
    /// appears in only some of the entries is measured over the entries carrying it.
    pub fn window_variance(history: &VecDeque<MetricsSnapshot>) -> Option<f64> {
        if history.len() < VARIANCE_WINDOW {
            return None;
        }

        let recent: Vec<&MetricsSnapshot> = history.iter().rev().take(VARIANCE_WINDOW).collect();

        let mut keys: Vec<&str> = recent.iter().flat_map(|s| s.keys()).collect();
        keys.sort_unstable();
        keys.dedup();

        let spread = keys
            .into_iter()
            .map(|key| {
                let (lo, hi) = recent
                    .iter()
                    .filter_map(|s| s.get(key))
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                hi - lo
            })
            .fold(0.0_f64, f64::max);

        Some(spread)
    }
}

impl Default for StabilityValidator {
    fn default() -> Self {
        Self::with_defaults()
    }
}
