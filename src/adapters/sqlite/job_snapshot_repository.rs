//! SQLite implementation of the JobSnapshotRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::adapters::sqlite::parse_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Job, JobId};
use crate::domain::ports::JobSnapshotRepository;

#[derive(Clone)]
pub struct SqliteJobSnapshotRepository {
    pool: SqlitePool,
}

impl SqliteJobSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &JobId) -> DomainResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM pipeline_jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_job).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    #[allow(dead_code)]
    kind: String,
    state: String,
    #[allow(dead_code)]
    remote_id: Option<String>,
    payload: String,
    started_at: String,
    #[allow(dead_code)]
    updated_at: String,
}

fn row_to_job(row: JobRow) -> DomainResult<Job> {
    let job: Job = serde_json::from_str(&row.payload)
        .map_err(|e| DomainError::SerializationError(format!("job {}: {e}", row.id)))?;

    if job.id.as_str() != row.id || job.state.as_str() != row.state {
        return Err(DomainError::SerializationError(format!(
            "job {} payload disagrees with its indexed columns",
            row.id
        )));
    }
    parse_datetime(&row.started_at)?;
    Ok(job)
}

#[async_trait]
impl JobSnapshotRepository for SqliteJobSnapshotRepository {
    async fn upsert(&self, job: &Job) -> DomainResult<()> {
        let payload = serde_json::to_string(job)?;

        sqlx::query(
            r#"INSERT INTO pipeline_jobs (id, kind, state, remote_id, payload, started_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   kind = excluded.kind,
                   state = excluded.state,
                   remote_id = excluded.remote_id,
                   payload = excluded.payload,
                   updated_at = excluded.updated_at"#,
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(job.state.as_str())
        .bind(job.remote_id.as_ref().map(|r| r.as_str().to_string()))
        .bind(&payload)
        .bind(job.started_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, id: &JobId) -> DomainResult<()> {
        sqlx::query("DELETE FROM pipeline_jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as("SELECT * FROM pipeline_jobs ORDER BY started_at, rowid")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{JobKind, JobState, RemoteJobId};

    async fn repo() -> SqliteJobSnapshotRepository {
        SqliteJobSnapshotRepository::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_upsert_replaces_payload() {
        let repo = repo().await;
        let mut job = Job::new(JobId::from("job-1"), JobKind::Writer);
        repo.upsert(&job).await.unwrap();

        job.remote_id = Some(RemoteJobId::new("remote-7"));
        job.transition_to(JobState::Running).unwrap();
        repo.upsert(&job).await.unwrap();

        let stored = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, job);
        assert_eq!(repo.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_missing() {
        let repo = repo().await;
        let job = Job::new(JobId::from("job-2"), JobKind::Outline);
        repo.upsert(&job).await.unwrap();
        repo.remove(&job.id).await.unwrap();
        repo.remove(&job.id).await.unwrap();
        assert!(repo.get(&job.id).await.unwrap().is_none());
    }
}
