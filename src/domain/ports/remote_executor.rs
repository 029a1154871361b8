//! Remote executor port - backend that runs long jobs out of process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::models::{JobKind, RemoteJobId};
use crate::domain::ports::errors::RemoteError;

/// Job state as the remote executor reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Pending,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl RemoteState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

/// One status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub state: RemoteState,
    pub progress: f64,
    pub stage: Option<String>,
    pub message: Option<String>,
    /// Failure description when `state` is `Error`
    pub error: Option<String>,
    pub completed_items: Option<u64>,
    pub total_items: Option<u64>,
    pub current_item: Option<String>,
}

impl RemoteStatus {
    pub fn new(state: RemoteState, progress: f64) -> Self {
        Self {
            state,
            progress,
            stage: None,
            message: None,
            error: None,
            completed_items: None,
            total_items: None,
            current_item: None,
        }
    }

    pub fn running(progress: f64) -> Self {
        Self::new(RemoteState::Running, progress)
    }

    pub fn complete() -> Self {
        Self::new(RemoteState::Complete, 1.0)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RemoteState::Error, 0.0)
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_items(mut self, completed: u64, total: u64) -> Self {
        self.completed_items = Some(completed);
        self.total_items = Some(total);
        self
    }
}

/// Port for the backend that executes remote jobs.
///
/// `status` must be idempotent; it is called repeatedly by the poller.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Begin a backend-side job.
    async fn start(
        &self,
        kind: JobKind,
        params: &serde_json::Value,
    ) -> Result<RemoteJobId, RemoteError>;

    /// Fetch the current status of a remote job.
    async fn status(&self, remote_id: &RemoteJobId) -> Result<RemoteStatus, RemoteError>;

    /// Ask the backend to stop. Best-effort; may be a no-op.
    async fn cancel(&self, remote_id: &RemoteJobId) -> Result<(), RemoteError>;
}
