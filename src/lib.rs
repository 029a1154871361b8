//! Greenlight - pipeline orchestration and consensus extraction core
//!
//! Greenlight turns source material into a structured world bible through a
//! chain of AI-assisted stages. This crate holds the parts that decide what
//! is true: job tracking across restarts, consensus over repeated entity
//! extractions, and field-by-field record population.
//!
//! # Architecture
//!
//! Hexagonal layout:
//!
//! - **Domain Layer** (`domain`): models, error taxonomy and port traits
//! - **Service Layer** (`services`): job lifecycle, consensus, population, pipelines
//! - **Adapters** (`adapters`): SQLite job store, prompted and rate-limited providers, mocks
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use greenlight::adapters::mock::MockRemoteExecutor;
//! use greenlight::services::{JobLifecycleManager, JobManagerConfig, StartJobRequest};
//! use greenlight::domain::models::JobKind;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = JobLifecycleManager::new(Arc::new(MockRemoteExecutor::new()), JobManagerConfig::default());
//!     let job = manager.start_job(StartJobRequest::new(JobKind::Outline)).await?;
//!     println!("{} is {}", job.id, job.state);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    CanonicalTag, Config, ConfirmedEntity, EntityType, ExtractedEntity, Field, FieldStatus, Job,
    JobId, JobKind, JobState, Record,
};
pub use domain::ports::{
    ExtractionProvider, GenerationProvider, JobSnapshotRepository, RemoteExecutor, TextModel,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ExtractionConsensus, FieldPopulationEngine, JobLifecycleManager, ReconciliationPoller,
};
