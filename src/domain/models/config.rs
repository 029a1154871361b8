use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for Greenlight
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting applied to provider calls
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Remote job reconciliation
    #[serde(default)]
    pub polling: PollingConfig,

    /// Consensus extraction tuning
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Field population tuning
    #[serde(default)]
    pub population: PopulationConfig,

    /// Job tracking
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".greenlight/greenlight.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_second() -> f64 {
    5.0
}

const fn default_burst_size() -> u32 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Reconciliation polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PollingConfig {
    /// Delay between status polls in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Status polls before giving up with a timeout error
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
}

const fn default_interval_ms() -> u64 {
    2000
}

const fn default_poll_attempts() -> u32 {
    150
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_poll_attempts(),
        }
    }
}

/// Consensus extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConsensusConfig {
    /// Independent extraction attempts per run (at least 2)
    #[serde(default = "default_consensus_attempts")]
    pub attempts: usize,

    /// Minimum agreeing attempts; unanimous when unset
    #[serde(default)]
    pub min_agreement: Option<usize>,

    /// Normalized Levenshtein similarity at which two names match
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Shortest name allowed to match by containment
    #[serde(default = "default_min_substring_len")]
    pub min_substring_len: usize,

    /// Extra tries per attempt on provider failure
    #[serde(default = "default_attempt_retries")]
    pub attempt_retries: u32,

    /// Per-try timeout in milliseconds; none when unset
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,

    /// Attempts in flight at once
    #[serde(default = "default_consensus_concurrency")]
    pub concurrency_limit: usize,

    /// Fewer surviving attempts than this fails the extraction
    #[serde(default = "default_min_surviving")]
    pub min_surviving_attempts: usize,
}

const fn default_consensus_attempts() -> usize {
    3
}

const fn default_similarity_threshold() -> f64 {
    0.85
}

const fn default_min_substring_len() -> usize {
    4
}

const fn default_attempt_retries() -> u32 {
    1
}

const fn default_consensus_concurrency() -> usize {
    3
}

const fn default_min_surviving() -> usize {
    2
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            attempts: default_consensus_attempts(),
            min_agreement: None,
            similarity_threshold: default_similarity_threshold(),
            min_substring_len: default_min_substring_len(),
            attempt_retries: default_attempt_retries(),
            attempt_timeout_ms: None,
            concurrency_limit: default_consensus_concurrency(),
            min_surviving_attempts: default_min_surviving(),
        }
    }
}

/// Field population configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PopulationConfig {
    /// Field generations in flight at once
    #[serde(default = "default_population_concurrency")]
    pub concurrency_limit: usize,

    /// Generation tries per field before it is marked as error
    #[serde(default = "default_field_attempts")]
    pub max_attempts: u32,
}

const fn default_population_concurrency() -> usize {
    5
}

const fn default_field_attempts() -> u32 {
    3
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_population_concurrency(),
            max_attempts: default_field_attempts(),
        }
    }
}

/// Job tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobsConfig {
    /// Log entries kept per job
    #[serde(default = "default_log_retention")]
    pub log_retention: usize,
}

const fn default_log_retention() -> usize {
    200
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            log_retention: default_log_retention(),
        }
    }
}
