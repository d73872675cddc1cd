//! Engine configuration.
//!
//! Loaded hierarchically:
//! 1. defaults in code
//! 2. an optional configuration file (`branchstock.toml` or an explicit path)
//! 3. environment overrides with the `BRANCHSTOCK__` prefix, `__` as the
//!    section separator (e.g. `BRANCHSTOCK__RETRY__MAX_ATTEMPTS=8`)

use std::time::Duration;

use config::{ConfigError, Environment, File, FileFormat, Map};
use serde::Deserialize;

use branchstock_observability::ObservabilityConfig;

pub const ENV_PREFIX: &str = "BRANCHSTOCK";
const DEFAULT_FILE: &str = "branchstock";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub logging: ObservabilityConfig,
}

/// Retry of operations that lost an optimistic-concurrency race.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 5,
                base_backoff_ms: 2,
                max_backoff_ms: 50,
            },
            logging: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `branchstock.toml` (if present) and `BRANCHSTOCK__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(Some(File::with_name(DEFAULT_FILE).required(false)), None)
    }

    /// Load from an explicit file plus environment overrides.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Self::build(Some(File::with_name(path)), None)
    }

    /// Parse TOML content plus an explicit environment map (no process env).
    pub fn from_toml(toml: &str, env: Map<String, String>) -> Result<Self, ConfigError> {
        Self::build(Some(File::from_str(toml, FileFormat::Toml)), Some(env))
    }

    fn build<S>(file: Option<S>, env: Option<Map<String, String>>) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = Self::default();

        let mut builder = config::Config::builder()
            .set_default("retry.max_attempts", i64::from(defaults.retry.max_attempts))?
            .set_default("retry.base_backoff_ms", defaults.retry.base_backoff_ms as i64)?
            .set_default("retry.max_backoff_ms", defaults.retry.max_backoff_ms as i64)?
            .set_default("logging.filter", defaults.logging.filter.clone())?
            .set_default("logging.json", defaults.logging.json)?;

        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let loaded: EngineConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Message(
                "retry.base_backoff_ms cannot exceed retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_yield_defaults() {
        let config = EngineConfig::from_toml("", Map::new()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            [retry]
            max_attempts = 9

            [logging]
            json = false
        "#;
        let config = EngineConfig::from_toml(toml, Map::new()).unwrap();
        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(config.retry.base_backoff_ms, 2);
        assert!(!config.logging.json);
    }

    #[test]
    fn environment_overrides_file() {
        let toml = "[retry]\nmax_attempts = 9\n";
        let mut env = Map::new();
        env.insert("BRANCHSTOCK__RETRY__MAX_ATTEMPTS".to_string(), "3".to_string());
        env.insert("BRANCHSTOCK__LOGGING__FILTER".to_string(), "debug".to_string());

        let config = EngineConfig::from_toml(toml, env).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = EngineConfig::from_toml("[retry]\nmax_attempts = 0\n", Map::new()).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }
}
