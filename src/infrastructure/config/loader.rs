use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(f64),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid polling.max_attempts: {0}. Must be at least 1")]
    InvalidPollAttempts(u32),

    #[error("Invalid polling.interval_ms: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid consensus.attempts: {0}. Must be at least 2")]
    InvalidConsensusAttempts(usize),

    #[error("Invalid consensus.min_agreement: {0}. Must be between 1 and {1}")]
    InvalidMinAgreement(usize, usize),

    #[error("Invalid similarity_threshold: {0}. Must be in (0, 1]")]
    InvalidSimilarity(f64),

    #[error("Invalid {0}: must be at least 1")]
    ZeroLimit(&'static str),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

const PROJECT_CONFIG: &str = ".greenlight/config.yaml";
const LOCAL_CONFIG: &str = ".greenlight/local.yaml";
const ENV_PREFIX: &str = "GREENLIGHT_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .greenlight/config.yaml
    /// 3. .greenlight/local.yaml
    /// 4. Environment variables (`GREENLIGHT_*`, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(PROJECT_CONFIG))
                .merge(Yaml::file(LOCAL_CONFIG))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
        .context("Failed to extract configuration from figment")
    }

    /// Load configuration from a specific file. Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
        .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment.extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        let rps = config.rate_limit.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            return Err(ConfigError::InvalidRateLimit(rps));
        }
        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        if config.polling.max_attempts == 0 {
            return Err(ConfigError::InvalidPollAttempts(config.polling.max_attempts));
        }
        if config.polling.interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.polling.interval_ms));
        }

        let consensus = &config.consensus;
        if consensus.attempts < 2 {
            return Err(ConfigError::InvalidConsensusAttempts(consensus.attempts));
        }
        if let Some(min) = consensus.min_agreement {
            if min == 0 || min > consensus.attempts {
                return Err(ConfigError::InvalidMinAgreement(min, consensus.attempts));
            }
        }
        let similarity = consensus.similarity_threshold;
        if !(similarity > 0.0 && similarity <= 1.0) {
            return Err(ConfigError::InvalidSimilarity(similarity));
        }
        if consensus.concurrency_limit == 0 {
            return Err(ConfigError::ZeroLimit("consensus.concurrency_limit"));
        }
        if consensus.min_surviving_attempts == 0 {
            return Err(ConfigError::ZeroLimit("consensus.min_surviving_attempts"));
        }
        if consensus.min_surviving_attempts > consensus.attempts {
            return Err(ConfigError::ValidationFailed(format!(
                "consensus.min_surviving_attempts ({}) exceeds consensus.attempts ({})",
                consensus.min_surviving_attempts, consensus.attempts
            )));
        }

        if config.population.concurrency_limit == 0 {
            return Err(ConfigError::ZeroLimit("population.concurrency_limit"));
        }
        if config.population.max_attempts == 0 {
            return Err(ConfigError::ZeroLimit("population.max_attempts"));
        }
        if config.jobs.log_retention == 0 {
            return Err(ConfigError::ZeroLimit("jobs.log_retention"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".greenlight/greenlight.db");
        assert_eq!(config.polling.interval_ms, 2000);
        assert_eq!(config.polling.max_attempts, 150);
        assert_eq!(config.consensus.attempts, 3);
        assert_eq!(config.consensus.min_agreement, None);
        assert_eq!(config.jobs.log_retention, 200);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
polling:
  interval_ms: 500
  max_attempts: 20
consensus:
  attempts: 5
  min_agreement: 3
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.polling.max_attempts, 20);
        assert_eq!(config.consensus.attempts, 5);
        assert_eq!(config.consensus.min_agreement, Some(3));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.rotation, "daily");
        assert_eq!(config.population.max_attempts, 3);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rotation() {
        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRotation(_))
        ));
    }

    #[test]
    fn test_validate_zero_rate_limit() {
        let mut config = Config::default();
        config.rate_limit.requests_per_second = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRateLimit(_))
        ));
    }

    #[test]
    fn test_validate_single_attempt_consensus() {
        let mut config = Config::default();
        config.consensus.attempts = 1;
        config.consensus.min_surviving_attempts = 1;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConsensusAttempts(1))
        ));
    }

    #[test]
    fn test_validate_min_agreement_above_attempts() {
        let mut config = Config::default();
        config.consensus.min_agreement = Some(4);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMinAgreement(4, 3))
        ));
    }

    #[test]
    fn test_validate_zero_poll_attempts() {
        let mut config = Config::default();
        config.polling.max_attempts = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPollAttempts(0))
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "polling:\n  interval_ms: 750\nlogging:\n  level: info\n  format: json").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "polling:\n  max_attempts: 9\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.polling.interval_ms, 750, "base value persists");
        assert_eq!(config.polling.max_attempts, 9, "override wins");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "consensus:\n  attempts: 4").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("GREENLIGHT_POLLING__MAX_ATTEMPTS", Some("12")),
                ("GREENLIGHT_CONSENSUS__MIN_AGREEMENT", Some("2")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.consensus.attempts, 4);
                assert_eq!(config.consensus.min_agreement, Some(2));
                assert_eq!(config.polling.max_attempts, 12);
            },
        );
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "population:\n  concurrency_limit: 0").unwrap();
        file.flush().unwrap();

        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(err.chain().any(|e| e.to_string().contains("population.concurrency_limit")));
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(ConfigLoader::load_from_file("/nonexistent/greenlight.yaml").is_err());
    }
}
