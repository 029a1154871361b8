//! Connection pool for the job store.
//!
//! One manager writes the store while CLI invocations read it, so file
//! databases run in WAL mode with a busy timeout. An in-memory database lives
//! only as long as its single connection.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::DatabaseConfig;

const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid database URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Cannot create database directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot open job store: {0}")]
    Open(#[source] sqlx::Error),
    #[error("Job store did not answer: {0}")]
    Unreachable(#[source] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// How long a writer waits on a locked database
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections.max(1),
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(10),
        }
    }
}

/// `sqlite:` URL for a database file path.
pub fn database_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{path}")
    }
}

/// The file behind a `sqlite:` URL; `None` for in-memory databases.
fn database_file(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let rest = rest.split('?').next().unwrap_or(rest);
    (!rest.is_empty() && rest != ":memory:").then(|| Path::new(rest))
}

fn parse(url: &str) -> Result<SqliteConnectOptions, ConnectionError> {
    SqliteConnectOptions::from_str(url).map_err(|source| ConnectionError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

async fn open(options: SqliteConnectOptions, max_connections: u32, acquire_timeout: Duration) -> Result<SqlitePool, ConnectionError> {
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_with(options)
        .await
        .map_err(ConnectionError::Open)
}

/// Open the store at `url`, creating the file and its directory if missing.
pub async fn create_pool(url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, ConnectionError> {
    let config = config.unwrap_or_default();
    let directory = database_file(url)
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty());
    if let Some(directory) = directory {
        std::fs::create_dir_all(directory).map_err(|source| ConnectionError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })?;
    }

    let options = parse(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(config.busy_timeout);
    let pool = open(options, config.max_connections, config.acquire_timeout).await?;

    tracing::debug!(url, max_connections = config.max_connections, "job store pool ready");
    Ok(pool)
}

/// Single-connection in-memory store for tests.
pub async fn create_test_pool() -> Result<SqlitePool, ConnectionError> {
    // A second connection would see a different, empty database.
    open(parse(MEMORY_URL)?, 1, PoolConfig::default().acquire_timeout).await
}

pub async fn verify_connection(pool: &SqlitePool) -> Result<(), ConnectionError> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
        .map_err(ConnectionError::Unreachable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_prefix() {
        assert_eq!(database_url(".greenlight/greenlight.db"), "sqlite:.greenlight/greenlight.db");
        assert_eq!(database_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn test_database_file_from_url() {
        assert_eq!(database_file("sqlite:jobs.db"), Some(Path::new("jobs.db")));
        assert_eq!(database_file("sqlite:///tmp/jobs.db?mode=rwc"), Some(Path::new("/tmp/jobs.db")));
        assert_eq!(database_file(MEMORY_URL), None);
        assert_eq!(database_file("sqlite:"), None);
        assert_eq!(database_file("postgres://localhost/jobs"), None);
    }

    #[test]
    fn test_pool_config_from_database_config() {
        let config = DatabaseConfig {
            max_connections: 0,
            ..DatabaseConfig::default()
        };
        assert_eq!(PoolConfig::from(&config).max_connections, 1);
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        let url = database_url(&path.to_string_lossy());

        let pool = create_pool(&url, None).await.unwrap();
        verify_connection(&pool).await.unwrap();
        assert!(path.exists());
    }
}
