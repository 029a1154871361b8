//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across the integration test
//! files.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use greenlight::adapters::mock::MockRemoteExecutor;
use greenlight::domain::models::{EntityType, RawCandidate};
use greenlight::services::job_lifecycle::JobManagerConfig;
use greenlight::services::reconciliation_poller::PollConfig;
use greenlight::JobLifecycleManager;
use tempfile::TempDir;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Create a temporary test database path
///
/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let db_path = dir.path().join("test.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Manager config with a short poll interval for paused-clock tests.
pub fn manager_config(interval_ms: u64, max_attempts: u32) -> JobManagerConfig {
    JobManagerConfig {
        poll: PollConfig::new(Duration::from_millis(interval_ms), max_attempts),
        log_retention: 50,
    }
}

/// Manager backed by a fresh mock executor.
pub fn manager() -> (Arc<MockRemoteExecutor>, JobLifecycleManager) {
    let executor = Arc::new(MockRemoteExecutor::new());
    let manager = JobLifecycleManager::new(executor.clone(), manager_config(100, 10));
    (executor, manager)
}

/// `n` space-separated words.
pub fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}

pub fn characters(names: &[&str]) -> Vec<RawCandidate> {
    names
        .iter()
        .map(|name| RawCandidate::new(*name, EntityType::Character))
        .collect()
}
