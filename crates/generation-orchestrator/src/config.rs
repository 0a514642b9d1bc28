//! Service configuration loaded from TOML with environment overrides.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use runtime_admission::AdmissionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`ServiceConfig::rpm_limit`].
pub const RPM_LIMIT_ENV: &str = "GENERATOR_RPM_LIMIT";
/// Environment variable overriding [`ServiceConfig::model`].
pub const MODEL_ENV: &str = "GENERATOR_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Generator calls admitted per window.
    pub rpm_limit: u32,
    /// Length of the admission window.
    pub window_secs: u64,
    /// Utilization percent that triggers the admission warning.
    pub warn_utilization_percent: f64,
    /// Longest a caller waits for admission; `None` waits indefinitely.
    pub admission_wait_secs: Option<u64>,
    /// Upper bound on a single generator call.
    pub generator_timeout_secs: u64,
    /// Lifetime of cached question batches.
    pub item_ttl_secs: u64,
    /// Lifetime of cached submission outcomes.
    pub artifact_ttl_secs: u64,
    /// Period of the cache sweepers.
    pub sweep_interval_secs: u64,
    /// Score awarded to a correct submission.
    pub max_score: u32,
    /// Largest question batch a caller may request.
    pub max_batch_quantity: usize,
    /// Turns kept per chat session.
    pub transcript_turns: usize,
    /// Model label recorded on persisted records.
    pub model: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rpm_limit: 15,
            window_secs: 60,
            warn_utilization_percent: 80.0,
            admission_wait_secs: Some(120),
            generator_timeout_secs: 30,
            item_ttl_secs: 86_400,
            artifact_ttl_secs: 7 * 86_400,
            sweep_interval_secs: 86_400,
            max_score: 100,
            max_batch_quantity: 20,
            transcript_turns: 10,
            model: "generator-default".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ServiceConfig {
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    /// Apply [`RPM_LIMIT_ENV`] and [`MODEL_ENV`] from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars())
    }

    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            match name.as_str() {
                RPM_LIMIT_ENV => {
                    self.rpm_limit = value.trim().parse().map_err(|_| {
                        ConfigError::Invalid(format!("{RPM_LIMIT_ENV} must be an integer, got {value:?}"))
                    })?;
                }
                MODEL_ENV if !value.trim().is_empty() => self.model = value.trim().to_string(),
                _ => {}
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpm_limit == 0 {
            return Err(ConfigError::Invalid("rpm_limit must be at least 1".into()));
        }
        if self.window_secs == 0 {
            return Err(ConfigError::Invalid("window_secs must be non-zero".into()));
        }
        if self.generator_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "generator_timeout_secs must be non-zero".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be non-zero".into(),
            ));
        }
        if self.max_batch_quantity == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_quantity must be at least 1".into(),
            ));
        }
        if self.transcript_turns == 0 {
            return Err(ConfigError::Invalid(
                "transcript_turns must be at least 1".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            capacity: self.rpm_limit,
            window: Duration::from_secs(self.window_secs),
            warn_utilization_percent: self.warn_utilization_percent,
        }
    }

    #[must_use]
    pub fn admission_wait(&self) -> Option<Duration> {
        self.admission_wait_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub const fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    #[must_use]
    pub const fn item_ttl(&self) -> Duration {
        Duration::from_secs(self.item_ttl_secs)
    }

    #[must_use]
    pub const fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = ServiceConfig::from_toml_str("rpm_limit = 30\nmodel = \"m-1\"\n")
            .expect("valid document");
        assert_eq!(config.rpm_limit, 30);
        assert_eq!(config.model, "m-1");
        assert_eq!(config.window_secs, 60);
        assert_eq!(config.admission_config().window, Duration::from_secs(60));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let err = ServiceConfig::from_toml_str("rpm_limit = 0").expect_err("invalid");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = ServiceConfig::from_toml_str("rpm_limit = [").expect_err("invalid toml");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides([
                (RPM_LIMIT_ENV.to_string(), " 5 ".to_string()),
                (MODEL_ENV.to_string(), "flash".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .expect("overrides valid");
        assert_eq!(config.rpm_limit, 5);
        assert_eq!(config.model, "flash");

        let err = config
            .apply_overrides([(RPM_LIMIT_ENV.to_string(), "lots".to_string())])
            .expect_err("non-numeric limit");
        assert!(err.to_string().contains(RPM_LIMIT_ENV));
    }
}
