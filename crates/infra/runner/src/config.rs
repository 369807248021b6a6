//! Runner configuration.

use relay_dlq::DlqConfig;
use serde::{Deserialize, Serialize};

/// Process-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Log level.
    pub log_level: String,
    /// Run the batch reprocessor loop.
    pub enable_reprocessor: bool,
    /// Run the monitor loop.
    pub enable_monitor: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_reprocessor: true,
            enable_monitor: true,
        }
    }
}

impl RunnerSettings {
    /// Parses the configured log level.
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.log_level)))
    }
}

/// Complete runner configuration.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// `[runner]` section.
    pub runner: RunnerSettings,
    /// `[dlq]` section.
    pub dlq: DlqConfig,
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &str) -> Result<RunnerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_config(&content)
}

/// Parses configuration from TOML text. Missing sections fall back to defaults.
pub fn parse_config(content: &str) -> Result<RunnerConfig, ConfigError> {
    let config: toml::Value =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    let runner: RunnerSettings = config
        .get("runner")
        .map(|v| toml::Value::try_into(v.clone()))
        .transpose()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?
        .unwrap_or_default();

    let dlq: DlqConfig = config
        .get("dlq")
        .map(|v| toml::Value::try_into(v.clone()))
        .transpose()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?
        .unwrap_or_default();

    runner.level()?;
    dlq.validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    Ok(RunnerConfig { runner, dlq })
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
