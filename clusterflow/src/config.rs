//! Configuration for lifecycle managers.

use crate::errors::ClusterflowError;
use crate::steps::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

/// Configuration shared by every pipeline a manager runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Interval between condition polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Retry schedule for authorization failures.
    #[serde(default)]
    pub authorization_retry: RetryConfig,
    /// How long a run lease is held before it must be renewed.
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    /// Value recorded as the provenance of a full admin update.
    #[serde(default = "default_provisioned_by")]
    pub provisioned_by: String,
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_lease_duration_secs() -> u64 {
    60
}

fn default_provisioned_by() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            authorization_retry: RetryConfig::default(),
            lease_duration_secs: default_lease_duration_secs(),
            provisioned_by: default_provisioned_by(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterflowError::Config`] on malformed JSON or a zero poll
    /// interval.
    pub fn from_json(raw: &str) -> Result<Self, ClusterflowError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ClusterflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterflowError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<(), ClusterflowError> {
        if self.poll_interval_ms == 0 {
            return Err(ClusterflowError::Config("poll_interval_ms must be positive".into()));
        }
        if self.authorization_retry.max_attempts == 0 {
            return Err(ClusterflowError::Config(
                "authorization_retry.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Sets the condition poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the authorization retry schedule.
    #[must_use]
    pub fn with_authorization_retry(mut self, retry: RetryConfig) -> Self {
        self.authorization_retry = retry;
        self
    }

    /// Sets the provenance value.
    #[must_use]
    pub fn with_provisioned_by(mut self, provisioned_by: impl Into<String>) -> Self {
        self.provisioned_by = provisioned_by.into();
        self
    }

    /// Sets the lease duration.
    #[must_use]
    pub fn with_lease_duration_secs(mut self, secs: u64) -> Self {
        self.lease_duration_secs = secs;
        self
    }

    /// Returns the condition poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the lease duration.
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.lease_duration(), Duration::from_secs(60));
        assert_eq!(config.authorization_retry.max_attempts, 10);
        assert_eq!(config.provisioned_by, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_json_partial() {
        let config = ManagerConfig::from_json(
            r#"{"poll_interval_ms": 250, "logging": {"format": "json"}, "authorization_retry": {"max_attempts": 3}}"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.authorization_retry.max_attempts, 3);
        assert_eq!(config.authorization_retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_from_json_rejects_zero_interval() {
        let err = ManagerConfig::from_json(r#"{"poll_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ClusterflowError::Config(_)));
        assert!(ManagerConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_builders() {
        let config = ManagerConfig::new()
            .with_poll_interval(Duration::from_millis(5))
            .with_provisioned_by("v20240101")
            .with_lease_duration_secs(120);
        assert_eq!(config.poll_interval_ms, 5);
        assert_eq!(config.provisioned_by, "v20240101");
        assert_eq!(config.lease_duration(), Duration::from_secs(120));
    }
}
