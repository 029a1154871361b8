//! Job store tests against a SQLite file database.

mod common;

use std::sync::Arc;

use greenlight::adapters::mock::MockRemoteExecutor;
use greenlight::adapters::sqlite::{database_url, initialize_database, SqliteJobSnapshotRepository};
use greenlight::domain::models::{FailureKind, Job, JobId, JobKind, JobState, RemoteJobId};
use greenlight::domain::ports::{JobSnapshotRepository, RemoteStatus};
use greenlight::services::StartJobRequest;
use greenlight::JobLifecycleManager;
use serde_json::json;

use common::{manager_config, temp_db_path};

async fn open(path: &std::path::Path) -> SqliteJobSnapshotRepository {
    let url = database_url(&path.to_string_lossy());
    SqliteJobSnapshotRepository::new(initialize_database(&url, None).await.unwrap())
}

#[tokio::test]
async fn test_jobs_survive_reopening_the_database() {
    let (_dir, path) = temp_db_path();

    let mut job = Job::new(JobId::new("job-1"), JobKind::Outline).with_metadata(json!({"chapter": 3}));
    job.state = JobState::Running;
    job.remote_id = Some(RemoteJobId::new("remote-3"));
    {
        let repo = open(&path).await;
        repo.upsert(&job).await.unwrap();
        repo.upsert(&Job::new(JobId::new("job-2"), JobKind::Writer)).await.unwrap();
    }

    let repo = open(&path).await;
    let loaded = repo.load_all().await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], job);

    repo.remove(&JobId::new("job-2")).await.unwrap();
    assert!(repo.get(&JobId::new("job-2")).await.unwrap().is_none());
    assert_eq!(repo.load_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_restart_resumes_from_the_store() {
    common::setup_test_logging();
    let (_dir, path) = temp_db_path();

    let (remote_id, local_id) = {
        let executor = Arc::new(MockRemoteExecutor::new());
        let store = Arc::new(open(&path).await);
        let manager = JobLifecycleManager::with_store(executor, store, manager_config(10_000, 2));

        let remote = manager.start_job(StartJobRequest::new(JobKind::Director)).await.unwrap();
        let local = manager
            .start_local_job(StartJobRequest::new(JobKind::WorldBuilder), |ctx| async move {
                while !ctx.is_cancelled() {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                ctx.ensure_active().map(|()| json!(null))
            })
            .await
            .unwrap();
        (remote.id, local.id)
    };

    let executor = Arc::new(MockRemoteExecutor::new());
    executor.script("remote-1", vec![Ok(RemoteStatus::complete())]);
    let store = Arc::new(open(&path).await);
    let manager = JobLifecycleManager::with_store(executor.clone(), store.clone(), manager_config(10, 5));

    let report = manager.restore_from_store().await.unwrap();
    assert_eq!(report.restored, 2);
    assert_eq!(report.interrupted, vec![local_id.clone()]);
    assert!(report.resumed.is_empty());

    let remote = manager.get(&remote_id).await.unwrap();
    assert_eq!(remote.state, JobState::Complete);
    assert_eq!(executor.status_calls(), 1);

    let stored = store.get(&local_id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Error);
    assert_eq!(stored.error.unwrap().kind, FailureKind::Interrupted);
    assert_eq!(store.get(&remote_id).await.unwrap().unwrap().state, JobState::Complete);
}
