use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::coordinator::CoordinatorConfig;
use crate::domain::CriteriaTable;
use crate::error::{PhaseGateError, Result};
use crate::persistence::CheckpointConfig;
use crate::services::ExportConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Opaque parameters handed to every agent step producer
    #[serde(default)]
    pub agent_params: AgentParams,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub criteria: CriteriaTable,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Producer parameters.
///
/// The coordinator never interprets or range-checks these; they are passed
/// through to the agent step producers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentParams {
    pub micro_lag: f64,
    pub wavelet_base: i64,
    pub compton_base: f64,
    /// Expected in 0..=1
    pub entropy_weight: f64,
    pub coherence_threshold: f64,
    pub hma_length: i64,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            micro_lag: 0.000009,
            wavelet_base: 17,
            compton_base: 43.00826,
            entropy_weight: 0.85,
            coherence_threshold: 1.014,
            hma_length: 53,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the rolling log file; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PHASEGATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PHASEGATE__COORDINATOR__TICK_INTERVAL_MS, etc.)
            .add_source(
                Environment::with_prefix("PHASEGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load and validate in one go; any problem is a configuration error
    pub fn load_validated<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config = Self::load_from(config_dir)?;
        config
            .validate()
            .map_err(|errors| PhaseGateError::Configuration(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// `agent_params` are deliberately not checked.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(mut coordinator_errors) = self.coordinator.validate() {
            errors.append(&mut coordinator_errors);
        }

        if let Err(mut criteria_errors) = self.criteria.validate() {
            errors.append(&mut criteria_errors);
        }

        if self.checkpoint.interval_secs == 0 {
            errors.push("checkpoint.interval_secs must be positive".to_string());
        }

        if self.checkpoint.dir.trim().is_empty() {
            errors.push("checkpoint.dir must not be empty".to_string());
        }

        if self.export.dir.trim().is_empty() {
            errors.push("export.dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent_params.wavelet_base, 17);
        assert_eq!(config.coordinator.tick_interval_ms, 1000);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = AppConfig::default();
        config.coordinator.tick_interval_ms = 0;
        config.coordinator.agents = vec!["coherence".to_string(), "gravity".to_string()];
        config.checkpoint.interval_secs = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("gravity")));
    }

    #[test]
    fn test_agent_params_are_not_range_checked() {
        let mut config = AppConfig::default();
        config.agent_params.entropy_weight = 7.5;
        config.agent_params.hma_length = -3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_missing_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.criteria, CriteriaTable::default());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[agent_params]
wavelet_base = 21
micro_lag = 0.000012

[coordinator]
tick_interval_ms = 250
agents = ["coherence", "optimizer"]

[export]
format = "csv"
"#,
        )
        .unwrap();

        let config = AppConfig::load_validated(dir.path()).unwrap();
        assert_eq!(config.agent_params.wavelet_base, 21);
        assert_eq!(config.agent_params.hma_length, 53);
        assert_eq!(config.coordinator.tick_interval_ms, 250);
        assert_eq!(config.coordinator.agents.len(), 2);
        assert_eq!(config.export.format, crate::services::ExportFormat::Csv);
    }
}
