//! Job domain model.
//!
//! A job is one tracked run of a pipeline stage. Jobs carry their own stage
//! history, progress, bounded log and terminal error so that a consumer can
//! render them without talking to the executor that runs them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Opaque job identifier, caller-assigned or generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Correlation id handed out by the remote executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteJobId(String);

impl RemoteJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline a job belongs to. At most one job per kind runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingestion,
    WorldBuilder,
    Outline,
    Writer,
    Director,
    References,
    Storyboard,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        Self::Ingestion,
        Self::WorldBuilder,
        Self::Outline,
        Self::Writer,
        Self::Director,
        Self::References,
        Self::Storyboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::WorldBuilder => "world_builder",
            Self::Outline => "outline",
            Self::Writer => "writer",
            Self::Director => "director",
            Self::References => "references",
            Self::Storyboard => "storyboard",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "ingestion" => Some(Self::Ingestion),
            "world_builder" | "world_build" => Some(Self::WorldBuilder),
            "outline" | "outline_generator" => Some(Self::Outline),
            "writer" => Some(Self::Writer),
            "director" => Some(Self::Director),
            "references" => Some(Self::References),
            "storyboard" => Some(Self::Storyboard),
            _ => None,
        }
    }

    /// Stage names a job of this kind declares when it starts.
    pub fn default_stages(&self) -> &'static [&'static str] {
        match self {
            Self::Ingestion => &["Extract Entities", "Build Consensus"],
            Self::WorldBuilder => &[
                "Generate World Context",
                "Generate Character Descriptions",
                "Generate Location Descriptions",
                "Generate Prop Descriptions",
            ],
            Self::Outline => &[
                "Load World Config",
                "Generate Dramatic Arc",
                "Generate Mystery Unfolding",
                "Generate Character Journey",
                "Save Variants",
            ],
            Self::Writer => &[
                "Load Pitch",
                "Extract World Config",
                "Generate Script",
                "Save Outputs",
            ],
            Self::Director => &[
                "Load Script",
                "Analyze Scenes",
                "Generate Visual Script",
                "Save Outputs",
            ],
            Self::References => &[
                "Load World Config",
                "Character References",
                "Location References",
                "Prop References",
            ],
            Self::Storyboard => &[
                "Load Visual Script",
                "Prepare Prompts",
                "Generate Images",
                "Save Outputs",
            ],
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, executor not yet confirmed
    Initializing,
    /// Queued behind another job of the same kind
    Pending,
    /// Executing
    Running,
    Complete,
    Error,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initializing" => Some(Self::Initializing),
            "pending" | "queued" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "complete" | "completed" => Some(Self::Complete),
            "error" | "failed" => Some(Self::Error),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// Active jobs are the ones returned by `list_active`.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> &'static [JobState] {
        match self {
            Self::Pending => &[Self::Initializing, Self::Cancelled],
            Self::Initializing => &[Self::Running, Self::Error, Self::Cancelled],
            Self::Running => &[Self::Complete, Self::Error, Self::Cancelled],
            Self::Complete | Self::Error | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one stage inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Complete,
    Error,
    Skipped,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Skipped)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub state: StageState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Pending,
            started_at: None,
            ended_at: None,
            message: None,
        }
    }
}

/// Partial update for a stage entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePatch {
    pub state: Option<StageState>,
    pub message: Option<String>,
}

impl StagePatch {
    pub fn state(state: StageState) -> Self {
        Self {
            state: Some(state),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: LogSeverity,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, severity: LogSeverity) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            severity,
        }
    }
}

/// Classification of a terminal job error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientAttempts,
    FieldValidation,
    /// Poll budget exhausted; the remote may still be working
    RemoteTimeout,
    RemoteReported,
    StartFailed,
    /// Local work lost to a process restart
    Interrupted,
    Internal,
}

/// What a consumer can reasonably offer after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryHint {
    RetryStage,
    CheckLater,
    Restart,
}

impl RecoveryHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryStage => "retry the stage",
            Self::CheckLater => "check back later; the remote job may still finish",
            Self::Restart => "restart the job",
        }
    }
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientAttempts => "insufficient_attempts",
            Self::FieldValidation => "field_validation",
            Self::RemoteTimeout => "remote_timeout",
            Self::RemoteReported => "remote_reported",
            Self::StartFailed => "start_failed",
            Self::Interrupted => "interrupted",
            Self::Internal => "internal",
        }
    }

    /// False only when the outcome is unknown.
    pub fn is_definite(&self) -> bool {
        !matches!(self, Self::RemoteTimeout)
    }

    pub fn recovery(&self) -> RecoveryHint {
        match self {
            Self::RemoteTimeout => RecoveryHint::CheckLater,
            Self::StartFailed | Self::Interrupted => RecoveryHint::Restart,
            _ => RecoveryHint::RetryStage,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&DomainError> for JobFailure {
    fn from(err: &DomainError) -> Self {
        Self::new(err.failure_kind(), err.to_string())
    }
}

/// One tracked unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub remote_id: Option<RemoteJobId>,
    pub kind: JobKind,
    pub state: JobState,
    pub progress: f64,
    pub stages: Vec<Stage>,
    pub current_stage: Option<String>,
    pub current_item: Option<String>,
    pub total_items: Option<u64>,
    pub completed_items: Option<u64>,
    pub logs: VecDeque<LogEntry>,
    /// Log entries evicted by the retention cap
    #[serde(default)]
    pub dropped_logs: u64,
    pub error: Option<JobFailure>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_id: None,
            kind,
            state: JobState::Initializing,
            progress: 0.0,
            stages: Vec::new(),
            current_stage: None,
            current_item: None,
            total_items: None,
            completed_items: None,
            logs: VecDeque::new(),
            dropped_logs: 0,
            error: None,
            metadata: serde_json::Value::Null,
            output: None,
            started_at: now,
            ended_at: None,
            updated_at: now,
        }
    }

    pub fn with_stages<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = names.into_iter().map(Stage::new).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Move to `next`, stamping timestamps and settling running stages.
    pub fn transition_to(&mut self, next: JobState) -> DomainResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
                reason: "transition not allowed".to_string(),
            });
        }

        let now = Utc::now();
        self.state = next;
        self.updated_at = now;

        if next.is_terminal() {
            self.ended_at = Some(now);
            let settled = match next {
                JobState::Complete => StageState::Complete,
                JobState::Error => StageState::Error,
                _ => StageState::Skipped,
            };
            for stage in self.stages.iter_mut().filter(|s| s.state == StageState::Running) {
                stage.state = settled;
                stage.ended_at = Some(now);
            }
            if next == JobState::Complete {
                self.progress = 1.0;
            }
        }
        Ok(())
    }

    /// Transition to `error` with the failure attached and logged.
    pub fn fail(&mut self, failure: JobFailure, retention: usize) -> DomainResult<()> {
        // Pending jobs have no edge to error.
        if self.state == JobState::Pending {
            self.transition_to(JobState::Initializing)?;
        }
        self.transition_to(JobState::Error)?;
        self.push_log(LogEntry::new(failure.message.clone(), LogSeverity::Error), retention);
        self.error = Some(failure);
        Ok(())
    }

    /// Append or mutate the named stage.
    pub fn apply_stage_patch(&mut self, name: &str, patch: StagePatch) {
        let now = Utc::now();
        let idx = match self.stages.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.stages.push(Stage::new(name));
                self.stages.len() - 1
            }
        };
        let stage = &mut self.stages[idx];

        if let Some(state) = patch.state {
            stage.state = state;
            match state {
                StageState::Running => {
                    stage.started_at.get_or_insert(now);
                    self.current_stage = Some(name.to_string());
                }
                s if s.is_finished() => {
                    stage.ended_at = Some(now);
                }
                _ => {}
            }
        }
        if let Some(message) = patch.message {
            stage.message = Some(message);
        }
        self.updated_at = now;
    }

    /// Append a log entry, evicting the oldest beyond `retention`.
    pub fn push_log(&mut self, entry: LogEntry, retention: usize) {
        self.logs.push_back(entry);
        while self.logs.len() > retention.max(1) {
            self.logs.pop_front();
            self.dropped_logs += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Raise progress; lower values are ignored. Returns whether it moved.
    pub fn advance_progress(&mut self, progress: f64) -> bool {
        let clamped = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        if clamped > self.progress {
            self.progress = clamped;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Record item counters and derive progress from them.
    pub fn set_items(&mut self, completed: u64, total: u64, current: Option<String>) {
        self.completed_items = Some(completed);
        self.total_items = Some(total);
        if current.is_some() {
            self.current_item = current;
        }
        if total > 0 {
            #[allow(clippy::cast_precision_loss)]
            let ratio = completed.min(total) as f64 / total as f64;
            self.advance_progress(ratio);
        }
        self.updated_at = Utc::now();
    }
}

/// Flat, serializable view of every tracked job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSetSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
}

impl JobSetSnapshot {
    pub const VERSION: u32 = 1;

    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            version: Self::VERSION,
            taken_at: Utc::now(),
            jobs,
        }
    }

    pub fn to_json(&self) -> DomainResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> DomainResult<Self> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version > Self::VERSION {
            return Err(DomainError::ValidationFailed(format!(
                "snapshot version {} is newer than supported version {}",
                snapshot.version,
                Self::VERSION
            )));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_job() -> Job {
        let mut job = Job::new(JobId::from("job-1"), JobKind::Ingestion)
            .with_stages(JobKind::Ingestion.default_stages().iter().copied());
        job.transition_to(JobState::Running).unwrap();
        job
    }

    #[test]
    fn test_state_machine_edges() {
        assert!(JobState::Initializing.can_transition_to(JobState::Running));
        assert!(JobState::Initializing.can_transition_to(JobState::Cancelled));
        assert!(JobState::Running.can_transition_to(JobState::Complete));
        assert!(JobState::Pending.can_transition_to(JobState::Initializing));
        assert!(!JobState::Pending.can_transition_to(JobState::Running));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Running));
        assert!(!JobState::Complete.can_transition_to(JobState::Error));
    }

    #[test]
    fn test_terminal_transition_is_rejected() {
        let mut job = running_job();
        job.transition_to(JobState::Cancelled).unwrap();
        let err = job.transition_to(JobState::Running).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = running_job();
        assert!(job.advance_progress(0.4));
        assert!(!job.advance_progress(0.2));
        assert!((job.progress - 0.4).abs() < f64::EPSILON);
        assert!(job.advance_progress(7.0));
        assert!((job.progress - 1.0).abs() < f64::EPSILON);
        assert!(!job.advance_progress(f64::NAN));
    }

    #[test]
    fn test_stage_patch_appends_unknown_stage() {
        let mut job = running_job();
        job.apply_stage_patch("Review", StagePatch::state(StageState::Running));
        assert_eq!(job.stages.len(), 3);
        assert_eq!(job.current_stage.as_deref(), Some("Review"));
        assert!(job.stage("Review").unwrap().started_at.is_some());

        job.apply_stage_patch(
            "Review",
            StagePatch::state(StageState::Complete).with_message("done"),
        );
        let review = job.stage("Review").unwrap();
        assert_eq!(review.state, StageState::Complete);
        assert_eq!(review.message.as_deref(), Some("done"));
        assert!(review.ended_at.is_some());
    }

    #[test]
    fn test_log_retention_keeps_most_recent() {
        let mut job = running_job();
        for i in 0..5 {
            job.push_log(LogEntry::new(format!("line {i}"), LogSeverity::Info), 3);
        }
        let messages: Vec<_> = job.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(job.dropped_logs, 2);
    }

    #[test]
    fn test_error_settles_running_stage() {
        let mut job = running_job();
        job.apply_stage_patch("Extract Entities", StagePatch::state(StageState::Running));
        job.fail(JobFailure::new(FailureKind::RemoteReported, "boom"), 10).unwrap();
        assert_eq!(job.stage("Extract Entities").unwrap().state, StageState::Error);
        assert_eq!(job.error.as_ref().unwrap().kind, FailureKind::RemoteReported);
        assert_eq!(job.logs.back().unwrap().message, "boom");
    }

    #[test]
    fn test_pending_job_can_fail() {
        let mut job = Job::new(JobId::new("queued"), JobKind::Ingestion);
        job.state = JobState::Pending;
        job.fail(JobFailure::new(FailureKind::Interrupted, "lost"), 10).unwrap();
        assert_eq!(job.state, JobState::Error);
        assert!(job.ended_at.is_some());

        assert!(job.fail(JobFailure::new(FailureKind::Internal, "again"), 10).is_err());
        assert_eq!(job.error.as_ref().unwrap().kind, FailureKind::Interrupted);
    }

    #[test]
    fn test_items_drive_progress() {
        let mut job = running_job();
        job.set_items(3, 4, Some("CHAR_MEI".to_string()));
        assert!((job.progress - 0.75).abs() < f64::EPSILON);
        assert_eq!(job.current_item.as_deref(), Some("CHAR_MEI"));
    }

    #[test]
    fn test_failure_recovery_hints() {
        assert!(!FailureKind::RemoteTimeout.is_definite());
        assert_eq!(FailureKind::RemoteTimeout.recovery(), RecoveryHint::CheckLater);
        assert!(FailureKind::RemoteReported.is_definite());
        assert_eq!(FailureKind::FieldValidation.recovery(), RecoveryHint::RetryStage);
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let snapshot = JobSetSnapshot::new(vec![running_job()]);
        let json = snapshot.to_json().unwrap();
        let restored = JobSetSnapshot::from_json(&json).unwrap();
        assert_eq!(restored.jobs, snapshot.jobs);
    }

    #[test]
    fn test_kind_parsing_accepts_aliases() {
        assert_eq!(JobKind::from_str("world-build"), Some(JobKind::WorldBuilder));
        assert_eq!(JobKind::from_str("outline_generator"), Some(JobKind::Outline));
        assert_eq!(JobKind::from_str("nope"), None);
    }
}
