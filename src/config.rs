//! Configuration management for toolrunner.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution engine settings.
    pub execution: ExecutionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Execution engine configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Default timeout in seconds.
    pub timeout_secs: u64,
    /// Grace window between SIGTERM and SIGKILL, in milliseconds.
    pub termination_grace_ms: u64,
    /// How long to wait for the child after termination, in seconds.
    pub exit_wait_secs: u64,
    /// Extra program names treated as interpreters.
    pub extra_interpreters: Vec<String>,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            termination_grace_ms: 500,
            exit_wait_secs: 2,
            extra_interpreters: Vec::new(),
        }
    }
}

impl ExecutionSection {
    /// Default timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Termination grace window as a duration.
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Post-termination exit wait as a duration.
    pub fn exit_wait(&self) -> Duration {
        Duration::from_secs(self.exit_wait_secs)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment variable overrides from a lookup function.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup("TOOLRUNNER_TIMEOUT_SECS") {
            self.execution.timeout_secs = parse_timeout(&secs)?;
        }

        if let Some(level) = lookup("TOOLRUNNER_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(timeout) = args.timeout {
            self.execution.timeout_secs = timeout;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env()?;
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("0".to_string()));
        }
        Ok(())
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

fn parse_timeout(value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidTimeout(value.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Timeout is not a positive number of seconds.
    InvalidTimeout(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidTimeout(value) => write!(f, "invalid timeout: '{}'", value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.execution.timeout_secs, 120);
        assert_eq!(config.execution.termination_grace(), Duration::from_millis(500));
        assert_eq!(config.execution.exit_wait(), Duration::from_secs(2));
        assert!(config.execution.extra_interpreters.is_empty());
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "execution": {
                "timeout_secs": 30,
                "extra_interpreters": ["node", "ruby"]
            },
            "logging": { "level": "debug" }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.execution.timeout(), Duration::from_secs(30));
        assert_eq!(config.execution.extra_interpreters, vec!["node", "ruby"]);
        assert_eq!(config.execution.termination_grace_ms, 500); // Default
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_apply_env() {
        let mut config = Config::default();
        config
            .apply_env_from(lookup(&[
                ("TOOLRUNNER_TIMEOUT_SECS", "45"),
                ("TOOLRUNNER_LOG_LEVEL", "trace"),
                ("RUST_LOG", "warn"),
            ]))
            .unwrap();
        assert_eq!(config.execution.timeout_secs, 45);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_apply_env_rust_log_fallback() {
        let mut config = Config::default();
        config.apply_env_from(lookup(&[("RUST_LOG", "warn")])).unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_apply_env_invalid_timeout() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(lookup(&[("TOOLRUNNER_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid timeout"));
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = Args {
            timeout: Some(7),
            log_level: Some("debug".to_string()),
            ..Args::default()
        };

        config.apply_args(&args);
        assert_eq!(config.execution.timeout_secs, 7);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.execution.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"timeout_secs\""));
        assert!(json.contains("\"level\""));
    }
}
