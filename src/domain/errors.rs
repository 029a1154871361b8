//! Domain errors for the Greenlight pipeline core.

use thiserror::Error;

use crate::domain::models::job::{FailureKind, JobId, JobKind, JobState};

/// Domain-level errors raised by the pipeline core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainError {
    #[error("A {kind} job is already active: {active}")]
    Conflict { kind: JobKind, active: JobId },

    #[error("Only {succeeded} of {requested} extraction attempts succeeded (at least {required} needed)")]
    InsufficientAttempts {
        requested: usize,
        succeeded: usize,
        required: usize,
    },

    #[error("Field {key} has {words} words after {attempts} attempts, expected {min}-{max}")]
    FieldValidation {
        key: String,
        words: usize,
        min: usize,
        max: usize,
        attempts: u32,
    },

    #[error("No terminal status after {attempts} polls; the job may still be running remotely")]
    RemoteTimeout { attempts: u32 },

    #[error("Remote job failed: {0}")]
    RemoteReported(String),

    #[error("Job {job_id} could not be started: {reason}")]
    StartFailed { job_id: JobId, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Job {id} is already {state}")]
    AlreadyTerminal { id: JobId, state: JobState },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    #[error("Tag assigned more than once: {0}")]
    DuplicateTag(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Classify this error for storage on a failed job.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::InsufficientAttempts { .. } => FailureKind::InsufficientAttempts,
            Self::FieldValidation { .. } => FailureKind::FieldValidation,
            Self::RemoteTimeout { .. } => FailureKind::RemoteTimeout,
            Self::RemoteReported(_) => FailureKind::RemoteReported,
            Self::StartFailed { .. } => FailureKind::StartFailed,
            _ => FailureKind::Internal,
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            DomainError::RemoteTimeout { attempts: 5 }.failure_kind(),
            FailureKind::RemoteTimeout
        );
        assert_eq!(
            DomainError::RemoteReported("gpu oom".into()).failure_kind(),
            FailureKind::RemoteReported
        );
        assert_eq!(
            DomainError::JobNotFound(JobId::from("x")).failure_kind(),
            FailureKind::Internal
        );
    }

    #[test]
    fn test_timeout_message_mentions_remote() {
        let msg = DomainError::RemoteTimeout { attempts: 5 }.to_string();
        assert!(msg.contains("5 polls"));
        assert!(msg.contains("still be running"));
    }
}
