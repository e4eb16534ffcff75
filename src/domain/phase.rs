use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PhaseGateError;
use crate::validation::VARIANCE_WINDOW;

/// Ordered training phases. An agent passes through each exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Refinement,
    Validation,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Discovery, Phase::Refinement, Phase::Validation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Refinement => "refinement",
            Phase::Validation => "validation",
        }
    }

    /// Human-facing label, e.g. "Discovery"
    pub fn title(&self) -> &'static str {
        match self {
            Phase::Discovery => "Discovery",
            Phase::Refinement => "Refinement",
            Phase::Validation => "Validation",
        }
    }

    /// The phase that follows this one, `None` at the terminal phase
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Discovery => Some(Phase::Refinement),
            Phase::Refinement => Some(Phase::Validation),
            Phase::Validation => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Discovery
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discovery" => Ok(Phase::Discovery),
            "refinement" => Ok(Phase::Refinement),
            "validation" => Ok(Phase::Validation),
            other => Err(PhaseGateError::Configuration(format!(
                "unknown phase: {other}"
            ))),
        }
    }
}

/// Completion criteria for a single phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseCriteria {
    /// Lower bound every metric in a snapshot must meet
    pub min_threshold: f64,
    /// Consecutive qualifying observations required
    pub stability_count: u32,
    /// Allowed max-min spread within the most recent 3 observations
    pub max_variance: f64,
}

impl PhaseCriteria {
    pub const fn new(min_threshold: f64, stability_count: u32, max_variance: f64) -> Self {
        Self {
            min_threshold,
            stability_count,
            max_variance,
        }
    }
}

/// Criteria for every phase; phases left out of a config file keep their defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaTable {
    pub discovery: PhaseCriteria,
    pub refinement: PhaseCriteria,
    pub validation: PhaseCriteria,
}

impl CriteriaTable {
    pub fn get(&self, phase: Phase) -> &PhaseCriteria {
        match phase {
            Phase::Discovery => &self.discovery,
            Phase::Refinement => &self.refinement,
            Phase::Validation => &self.validation,
        }
    }

    /// Reject criteria that could never be satisfied or would never gate anything
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for phase in Phase::ALL {
            let c = self.get(phase);
            // A shorter history never yields a measured spread, so the phase could not complete
            if (c.stability_count as usize) < VARIANCE_WINDOW {
                errors.push(format!(
                    "{phase}: stability_count must be at least {VARIANCE_WINDOW}"
                ));
            }
            if !c.max_variance.is_finite() || c.max_variance < 0.0 {
                errors.push(format!("{phase}: max_variance must be a non-negative number"));
            }
            if !c.min_threshold.is_finite() {
                errors.push(format!("{phase}: min_threshold must be finite"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for CriteriaTable {
    fn default() -> Self {
        Self {
            discovery: PhaseCriteria::new(0.85, 20, 0.03),
            refinement: PhaseCriteria::new(0.90, 25, 0.02),
            validation: PhaseCriteria::new(0.95, 30, 0.01),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_one_directional() {
        assert_eq!(Phase::Discovery.next(), Some(Phase::Refinement));
        assert_eq!(Phase::Refinement.next(), Some(Phase::Validation));
        assert_eq!(Phase::Validation.next(), None);
        assert!(Phase::Discovery < Phase::Refinement);
        assert!(Phase::Validation.is_terminal());
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!("Refinement".parse::<Phase>().unwrap(), Phase::Refinement);
        let err = "exploration".parse::<Phase>().unwrap_err();
        assert!(matches!(err, PhaseGateError::Configuration(_)));
    }

    #[test]
    fn test_default_criteria() {
        let table = CriteriaTable::default();
        assert_eq!(table.get(Phase::Discovery).stability_count, 20);
        assert_eq!(table.get(Phase::Refinement).min_threshold, 0.90);
        assert_eq!(table.get(Phase::Validation).max_variance, 0.01);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_criteria_validation_rejects_zero_count() {
        let mut table = CriteriaTable::default();
        table.refinement.stability_count = 0;
        let errors = table.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("refinement"));
    }

    #[test]
    fn test_criteria_validation_rejects_count_below_variance_window() {
        let mut table = CriteriaTable::default();
        table.discovery.stability_count = 2;
        table.validation.stability_count = 3;
        let errors = table.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("discovery"));
        assert!(errors[0].contains("at least 3"));
    }
}
