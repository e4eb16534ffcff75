use thiserror::Error;

/// Main error type for the phase-gated coordinator
#[derive(Error, Debug)]
pub enum PhaseGateError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Agent lifecycle errors
    #[error("Initialization failed for agent {agent}: {reason}")]
    Initialization { agent: String, reason: String },

    #[error("Step failed for agent {agent}: {reason}")]
    Step { agent: String, reason: String },

    #[error("Step for agent {agent} exceeded deadline of {timeout_ms}ms")]
    StepTimeout { agent: String, timeout_ms: u64 },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unrecoverable failure: {0}")]
    Unrecoverable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PhaseGateError
pub type Result<T> = std::result::Result<T, PhaseGateError>;

/// Coarse classification used by the coordinator to decide isolation vs. propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A prerequisite was unmet while setting up one agent
    Initialization,
    /// One agent's tick failed; other agents keep running
    Step,
    /// A checkpoint or export write failed
    Persistence,
    /// Programmer or operator error, surfaced immediately
    Configuration,
    /// Anything else
    Internal,
}

impl PhaseGateError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PhaseGateError::Initialization { .. } => ErrorKind::Initialization,
            PhaseGateError::Step { .. } | PhaseGateError::StepTimeout { .. } => ErrorKind::Step,
            PhaseGateError::Persistence(_)
            | PhaseGateError::Io(_)
            | PhaseGateError::Json(_) => ErrorKind::Persistence,
            PhaseGateError::Config(_)
            | PhaseGateError::Configuration(_)
            | PhaseGateError::InvalidStateTransition { .. } => ErrorKind::Configuration,
            PhaseGateError::Unrecoverable(_)
            | PhaseGateError::Cancelled
            | PhaseGateError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the coordinator must stop instead of isolating the failure
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PhaseGateError::Config(_)
                | PhaseGateError::Configuration(_)
                | PhaseGateError::InvalidStateTransition { .. }
                | PhaseGateError::Unrecoverable(_)
        )
    }

    /// Wrap an arbitrary persistence failure
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        PhaseGateError::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        let step = PhaseGateError::Step {
            agent: "energy".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(step.kind(), ErrorKind::Step);
        assert!(!step.is_fatal());

        let timeout = PhaseGateError::StepTimeout {
            agent: "energy".to_string(),
            timeout_ms: 50,
        };
        assert_eq!(timeout.kind(), ErrorKind::Step);

        let io = PhaseGateError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(io.kind(), ErrorKind::Persistence);
        assert!(!io.is_fatal());

        let cfg = PhaseGateError::Configuration("unknown export category: foo".to_string());
        assert_eq!(cfg.kind(), ErrorKind::Configuration);
        assert!(cfg.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = PhaseGateError::Initialization {
            agent: "phase".to_string(),
            reason: "coherence too low".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Initialization failed for agent phase: coherence too low"
        );
    }
}
