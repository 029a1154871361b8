//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the pipeline core consumes:
//! - RemoteExecutor: backend that runs remote jobs
//! - ExtractionProvider: one entity extraction attempt
//! - GenerationProvider: text for one record field
//! - TextModel: raw language model behind the prompted providers
//! - JobSnapshotRepository: job persistence across restarts

pub mod errors;
pub mod extraction_provider;
pub mod generation_provider;
pub mod job_snapshot_repository;
pub mod remote_executor;
pub mod text_model;

pub use errors::{ProviderError, RemoteError};
pub use extraction_provider::{ExtractionInput, ExtractionProvider};
pub use generation_provider::{GenerationContext, GenerationProvider};
pub use job_snapshot_repository::JobSnapshotRepository;
pub use remote_executor::{RemoteExecutor, RemoteState, RemoteStatus};
pub use text_model::TextModel;
