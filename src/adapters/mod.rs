//! Adapters implementing the domain ports.
//!
//! - `sqlite`: job snapshot persistence
//! - `prompted`: extraction and generation over a plain text model
//! - `rate_limited`: request throttling around any provider
//! - `mock`: scripted implementations for tests and dry runs

pub mod mock;
pub mod prompted;
pub mod rate_limited;
pub mod sqlite;

pub use prompted::{PromptedExtractionProvider, PromptedGenerationProvider};
pub use rate_limited::RateLimited;
pub use sqlite::SqliteJobSnapshotRepository;
