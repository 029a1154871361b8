use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Job, JobId};

/// Repository port for persisted job snapshots
#[async_trait]
pub trait JobSnapshotRepository: Send + Sync {
    /// Insert or replace the stored snapshot of a job
    async fn upsert(&self, job: &Job) -> DomainResult<()>;

    /// Delete a job snapshot; unknown ids are ignored
    async fn remove(&self, id: &JobId) -> DomainResult<()>;

    /// Load every stored job, oldest first
    async fn load_all(&self) -> DomainResult<Vec<Job>>;
}
