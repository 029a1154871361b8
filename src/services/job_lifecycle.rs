//! Job lifecycle manager.
//!
//! Tracks every pipeline job from creation to a terminal state. At most one
//! job per [`JobKind`] is active at a time; later starts either fail with
//! [`DomainError::Conflict`] or wait in a per-kind queue. Remote jobs are
//! reconciled by one [`ReconciliationPoller`] each, local jobs run their work
//! on a spawned task. Consumers read cloned [`Job`] values or `watch`
//! receivers and mutate only through the manager.
//!
//! Cancellation is local first: the poller is stopped, the job is marked
//! cancelled and its slot released before the executor is asked to cancel.
//! Results that arrive for a terminal job are discarded.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, RwLock};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, FailureKind, Job, JobFailure, JobId, JobKind, JobSetSnapshot, JobState, LogEntry,
    LogSeverity, RemoteJobId, StagePatch, StageState,
};
use crate::domain::ports::{JobSnapshotRepository, RemoteError, RemoteExecutor, RemoteState, RemoteStatus};
use crate::services::reconciliation_poller::{PollConfig, PollOutcome, ReconciliationPoller};

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Runtime configuration for [`JobLifecycleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobManagerConfig {
    pub poll: PollConfig,
    /// Log entries kept per job
    pub log_retention: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for JobManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll: PollConfig::from(&config.polling),
            log_retention: config.jobs.log_retention,
        }
    }
}

/// Parameters for starting a job.
#[derive(Debug, Clone, PartialEq)]
pub struct StartJobRequest {
    pub kind: JobKind,
    /// Caller-assigned id; generated when absent
    pub id: Option<JobId>,
    /// Handed to the executor and stored as job metadata
    pub params: Value,
    /// Declared stage names; the kind's defaults when absent
    pub stages: Option<Vec<String>>,
    /// Wait for the kind's slot instead of failing with a conflict
    pub queue: bool,
}

impl StartJobRequest {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            id: None,
            params: Value::Null,
            stages: None,
            queue: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = Some(stages.into_iter().map(Into::into).collect());
        self
    }

    pub fn queued(mut self) -> Self {
        self.queue = true;
        self
    }

    fn into_job(self) -> Job {
        let id = self.id.unwrap_or_else(JobId::generate);
        let job = Job::new(id, self.kind).with_metadata(self.params);
        match self.stages {
            Some(stages) => job.with_stages(stages),
            None => job.with_stages(self.kind.default_stages().iter().copied()),
        }
    }
}

/// Result of a progress or stage update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    UnknownJob,
    /// The job was not running; the update was dropped
    Discarded(JobState),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// What [`JobLifecycleManager::restore`] did with each job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Remote jobs that are still running and being reconciled again
    pub resumed: Vec<JobId>,
    /// Local jobs whose work was lost
    pub interrupted: Vec<JobId>,
    /// Remote jobs whose kind already had an active job; failed, not resumed
    pub displaced: Vec<JobId>,
    /// Ids already tracked by this manager
    pub skipped: Vec<JobId>,
}

// ============================================================================
// Local work
// ============================================================================

type WorkFn = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, DomainResult<Value>> + Send>;

/// Queued work sits in the registry, which must stay `Sync`.
type LocalWork = Mutex<WorkFn>;

enum Launch {
    Remote,
    Local(LocalWork),
}

impl Launch {
    fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Handle given to local job work for reporting back to the manager.
#[derive(Clone)]
pub struct JobContext {
    manager: JobLifecycleManager,
    id: JobId,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub fn job_id(&self) -> &JobId {
        &self.id
    }

    pub async fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(job_id = %self.id, "{message}");
        self.manager.append_log(&self.id, message, LogSeverity::Info).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(job_id = %self.id, "{message}");
        self.manager.append_log(&self.id, message, LogSeverity::Warning).await;
    }

    pub async fn stage(&self, name: &str, state: StageState) -> UpdateOutcome {
        self.manager.update_stage(&self.id, name, StagePatch::state(state)).await
    }

    pub async fn stage_with_message(
        &self,
        name: &str,
        state: StageState,
        message: impl Into<String>,
    ) -> UpdateOutcome {
        self.manager
            .update_stage(&self.id, name, StagePatch::state(state).with_message(message))
            .await
    }

    pub async fn progress(&self, progress: f64) -> UpdateOutcome {
        self.manager.set_progress(&self.id, progress).await
    }

    pub async fn items(&self, completed: u64, total: u64, current: Option<String>) -> UpdateOutcome {
        self.manager.set_items(&self.id, completed, total, current).await
    }

    /// Attach output to the running job. It is kept when the work then
    /// returns an error, so partial results survive a failed job.
    pub async fn set_output(&self, output: Value) -> UpdateOutcome {
        self.manager
            .update_running(&self.id, |job| job.output = Some(output))
            .await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the job has been cancelled.
    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            Err(DomainError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

struct Tracked {
    job: Job,
    tx: watch::Sender<Job>,
    cancelled: Arc<AtomicBool>,
}

impl Tracked {
    fn new(job: Job) -> Self {
        let (tx, _) = watch::channel(job.clone());
        Self {
            job,
            tx,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.job.clone());
    }

    fn transition(&mut self, next: JobState) -> bool {
        match self.job.transition_to(next) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(job_id = %self.job.id, error = %err, "ignoring job transition");
                false
            }
        }
    }

    fn fail(&mut self, failure: JobFailure, retention: usize) {
        if let Err(err) = self.job.fail(failure, retention) {
            tracing::warn!(job_id = %self.job.id, error = %err, "ignoring job failure");
        }
    }
}

struct Promotion {
    id: JobId,
    launch: Launch,
    job: Job,
}

#[derive(Default)]
struct Registry {
    order: Vec<JobId>,
    jobs: HashMap<JobId, Tracked>,
    active: HashMap<JobKind, JobId>,
    queued: HashMap<JobKind, VecDeque<(JobId, Launch)>>,
    pollers: HashMap<JobId, ReconciliationPoller>,
}

impl Registry {
    fn insert(&mut self, job: Job) {
        self.order.push(job.id.clone());
        self.jobs.insert(job.id.clone(), Tracked::new(job));
    }

    /// Insert a new job, claiming the kind's slot or queueing behind it.
    /// Returns the launch to perform now, if any.
    fn admit(&mut self, mut job: Job, queue: bool, launch: Launch) -> DomainResult<(Job, Option<Launch>)> {
        if self.jobs.contains_key(&job.id) {
            return Err(DomainError::DuplicateJob(job.id));
        }

        if let Some(active) = self.active.get(&job.kind) {
            if !queue {
                return Err(DomainError::Conflict {
                    kind: job.kind,
                    active: active.clone(),
                });
            }
            job.state = JobState::Pending;
            let snapshot = job.clone();
            self.queued
                .entry(job.kind)
                .or_default()
                .push_back((job.id.clone(), launch));
            self.insert(job);
            return Ok((snapshot, None));
        }

        if launch.is_local() {
            job.transition_to(JobState::Running)?;
        }
        self.active.insert(job.kind, job.id.clone());
        let snapshot = job.clone();
        self.insert(job);
        Ok((snapshot, Some(launch)))
    }

    /// Free the kind's slot if `id` holds it and promote the next queued job.
    fn release(&mut self, kind: JobKind, id: &JobId) -> Option<Promotion> {
        if self.active.get(&kind) != Some(id) {
            return None;
        }
        self.active.remove(&kind);

        while let Some((next, launch)) = self.queued.get_mut(&kind).and_then(VecDeque::pop_front) {
            let Some(tracked) = self.jobs.get_mut(&next) else {
                continue;
            };
            if tracked.job.state != JobState::Pending {
                continue;
            }
            tracked.transition(JobState::Initializing);
            // Local work needs no executor confirmation and runs at once.
            if launch.is_local() {
                tracked.transition(JobState::Running);
            }
            tracked.publish();
            let job = tracked.job.clone();
            tracing::info!(job_id = %next, kind = %kind, "promoting queued job");
            self.active.insert(kind, next.clone());
            return Some(Promotion {
                id: next,
                launch,
                job,
            });
        }
        None
    }

    fn dequeue(&mut self, kind: JobKind, id: &JobId) {
        if let Some(queue) = self.queued.get_mut(&kind) {
            queue.retain(|(queued, _)| queued != id);
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &Job> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id).map(|t| &t.job))
    }
}

// ============================================================================
// Manager
// ============================================================================

struct Inner {
    registry: RwLock<Registry>,
    executor: Arc<dyn RemoteExecutor>,
    store: Option<Arc<dyn JobSnapshotRepository>>,
    config: JobManagerConfig,
}

/// Shared handle to the job registry. Cloning is cheap.
#[derive(Clone)]
pub struct JobLifecycleManager {
    inner: Arc<Inner>,
}

impl JobLifecycleManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: JobManagerConfig) -> Self {
        Self::build(executor, None, config)
    }

    /// Like [`new`](Self::new), persisting every job change to `store`.
    pub fn with_store(
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<dyn JobSnapshotRepository>,
        config: JobManagerConfig,
    ) -> Self {
        Self::build(executor, Some(store), config)
    }

    fn build(
        executor: Arc<dyn RemoteExecutor>,
        store: Option<Arc<dyn JobSnapshotRepository>>,
        config: JobManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                executor,
                store,
                config,
            }),
        }
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.inner.config
    }

    fn retention(&self) -> usize {
        self.inner.config.log_retention
    }

    /// Start a job on the remote executor.
    ///
    /// Returns once the executor has accepted the job (state `running`), or
    /// immediately with a `pending` job when it was queued.
    pub async fn start_job(&self, request: StartJobRequest) -> DomainResult<Job> {
        let queue = request.queue;
        let (job, launch) = {
            let mut registry = self.inner.registry.write().await;
            registry.admit(request.into_job(), queue, Launch::Remote)?
        };
        tracing::info!(job_id = %job.id, kind = %job.kind, state = %job.state, "job created");
        self.persist(&job).await;

        match launch {
            Some(_) => self.launch_remote(&job.id).await,
            None => Ok(job),
        }
    }

    /// Start a job whose work runs in this process.
    ///
    /// `work` receives a [`JobContext`]. `Ok(value)` completes the job with
    /// `value` as its output; `Err(e)` fails it with `e`'s failure kind and
    /// keeps any output set through [`JobContext::set_output`].
    pub async fn start_local_job<W, Fut>(&self, request: StartJobRequest, work: W) -> DomainResult<Job>
    where
        W: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = DomainResult<Value>> + Send + 'static,
    {
        let queue = request.queue;
        let work: WorkFn = Box::new(move |ctx| work(ctx).boxed());
        let (job, launch) = {
            let mut registry = self.inner.registry.write().await;
            registry.admit(request.into_job(), queue, Launch::Local(Mutex::new(work)))?
        };
        tracing::info!(job_id = %job.id, kind = %job.kind, state = %job.state, "local job created");
        self.persist(&job).await;

        if let Some(launch) = launch {
            self.dispatch(job.id.clone(), launch);
        }
        Ok(job)
    }

    /// Append or update a stage. Only running jobs accept stage updates.
    pub async fn update_stage(&self, id: &JobId, name: &str, patch: StagePatch) -> UpdateOutcome {
        let job = {
            let mut registry = self.inner.registry.write().await;
            let Some(tracked) = registry.jobs.get_mut(id) else {
                tracing::warn!(job_id = %id, stage = name, "stage update for unknown job");
                return UpdateOutcome::UnknownJob;
            };
            if tracked.job.state != JobState::Running {
                tracing::debug!(job_id = %id, stage = name, state = %tracked.job.state, "discarding stage update");
                return UpdateOutcome::Discarded(tracked.job.state);
            }
            tracked.job.apply_stage_patch(name, patch);
            tracked.publish();
            tracked.job.clone()
        };
        self.persist(&job).await;
        UpdateOutcome::Applied
    }

    pub async fn set_progress(&self, id: &JobId, progress: f64) -> UpdateOutcome {
        self.update_running(id, |job| {
            job.advance_progress(progress);
        })
        .await
    }

    pub async fn set_items(&self, id: &JobId, completed: u64, total: u64, current: Option<String>) -> UpdateOutcome {
        self.update_running(id, |job| job.set_items(completed, total, current))
            .await
    }

    async fn update_running<F>(&self, id: &JobId, f: F) -> UpdateOutcome
    where
        F: FnOnce(&mut Job),
    {
        let mut registry = self.inner.registry.write().await;
        let Some(tracked) = registry.jobs.get_mut(id) else {
            tracing::warn!(job_id = %id, "progress update for unknown job");
            return UpdateOutcome::UnknownJob;
        };
        if tracked.job.state != JobState::Running {
            return UpdateOutcome::Discarded(tracked.job.state);
        }
        f(&mut tracked.job);
        tracked.publish();
        UpdateOutcome::Applied
    }

    /// Append a log entry to any tracked job. Returns false for unknown ids.
    pub async fn append_log(&self, id: &JobId, message: impl Into<String>, severity: LogSeverity) -> bool {
        let retention = self.retention();
        let job = {
            let mut registry = self.inner.registry.write().await;
            let Some(tracked) = registry.jobs.get_mut(id) else {
                return false;
            };
            tracked.job.push_log(LogEntry::new(message, severity), retention);
            tracked.publish();
            tracked.job.clone()
        };
        self.persist(&job).await;
        true
    }

    /// Cancel a job and release its kind's slot.
    pub async fn cancel(&self, id: &JobId) -> DomainResult<Job> {
        let retention = self.retention();
        let (job, promotion) = {
            let mut registry = self.inner.registry.write().await;
            if let Some(poller) = registry.pollers.remove(id) {
                poller.stop();
            }

            let tracked = registry
                .jobs
                .get_mut(id)
                .ok_or_else(|| DomainError::JobNotFound(id.clone()))?;
            if tracked.job.is_terminal() {
                return Err(DomainError::AlreadyTerminal {
                    id: id.clone(),
                    state: tracked.job.state,
                });
            }

            tracked.cancelled.store(true, Ordering::SeqCst);
            let was_pending = tracked.job.state == JobState::Pending;
            tracked.transition(JobState::Cancelled);
            tracked
                .job
                .push_log(LogEntry::new("Job cancelled", LogSeverity::Warning), retention);
            tracked.publish();
            let job = tracked.job.clone();

            let promotion = if was_pending {
                registry.dequeue(job.kind, id);
                None
            } else {
                registry.release(job.kind, id)
            };
            (job, promotion)
        };
        tracing::info!(job_id = %id, kind = %job.kind, "job cancelled");
        self.persist(&job).await;

        if let Some(remote_id) = &job.remote_id {
            if let Err(err) = self.inner.executor.cancel(remote_id).await {
                tracing::warn!(job_id = %id, remote_id = %remote_id, error = %err, "remote cancel failed");
            }
        }
        self.promote(promotion).await;
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        let registry = self.inner.registry.read().await;
        registry.jobs.get(id).map(|t| t.job.clone())
    }

    /// Initializing, pending and running jobs in creation order.
    pub async fn list_active(&self) -> Vec<Job> {
        let registry = self.inner.registry.read().await;
        registry.ordered().filter(|j| j.state.is_active()).cloned().collect()
    }

    pub async fn list_all(&self) -> Vec<Job> {
        let registry = self.inner.registry.read().await;
        registry.ordered().cloned().collect()
    }

    /// The active job of `kind`, if any.
    pub async fn active_job(&self, kind: JobKind) -> Option<Job> {
        let registry = self.inner.registry.read().await;
        registry
            .active
            .get(&kind)
            .and_then(|id| registry.jobs.get(id))
            .map(|t| t.job.clone())
    }

    pub async fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<Job>> {
        let registry = self.inner.registry.read().await;
        registry.jobs.get(id).map(|t| t.tx.subscribe())
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait_until_terminal(&self, id: &JobId) -> DomainResult<Job> {
        let mut rx = self
            .subscribe(id)
            .await
            .ok_or_else(|| DomainError::JobNotFound(id.clone()))?;
        let job = rx
            .wait_for(Job::is_terminal)
            .await
            .map_err(|_| DomainError::JobNotFound(id.clone()))?;
        Ok((*job).clone())
    }

    /// Drop every terminal job. Returns the removed ids.
    pub async fn clear_completed(&self) -> Vec<JobId> {
        let removed: Vec<JobId> = {
            let mut registry = self.inner.registry.write().await;
            let removed: Vec<JobId> = registry
                .ordered()
                .filter(|j| j.is_terminal())
                .map(|j| j.id.clone())
                .collect();
            for id in &removed {
                registry.jobs.remove(id);
                registry.pollers.remove(id);
            }
            registry.order.retain(|id| !removed.contains(id));
            removed
        };

        if let Some(store) = &self.inner.store {
            for id in &removed {
                if let Err(err) = store.remove(id).await {
                    tracing::warn!(job_id = %id, error = %err, "failed to remove stored job");
                }
            }
        }
        tracing::debug!(count = removed.len(), "cleared terminal jobs");
        removed
    }

    pub async fn snapshot(&self) -> JobSetSnapshot {
        JobSetSnapshot::new(self.list_all().await)
    }

    /// Re-insert jobs from a snapshot.
    ///
    /// Jobs that claim to be active are not trusted as-is: remote jobs show
    /// as `initializing` until the executor has been queried again, local
    /// jobs are failed as interrupted. A remote job whose kind already has an
    /// active job is failed instead of resumed, and cancelled remotely.
    pub async fn restore(&self, snapshot: JobSetSnapshot) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut to_query = Vec::new();
        let mut displaced = Vec::new();

        {
            let mut registry = self.inner.registry.write().await;
            for mut job in snapshot.jobs {
                if registry.jobs.contains_key(&job.id) {
                    report.skipped.push(job.id.clone());
                    continue;
                }
                report.restored += 1;

                if job.state.is_active() {
                    match job.remote_id.clone() {
                        Some(remote_id) => match registry.active.get(&job.kind) {
                            Some(active) => {
                                tracing::warn!(
                                    job_id = %job.id,
                                    kind = %job.kind,
                                    active = %active,
                                    "restored job collides with an active job of its kind"
                                );
                                displaced.push((job.id.clone(), active.clone(), remote_id));
                            }
                            None => {
                                registry.active.insert(job.kind, job.id.clone());
                                // Reset without a transition; the next status moves it on.
                                job.state = JobState::Initializing;
                                to_query.push((job.id.clone(), remote_id));
                            }
                        },
                        None => report.interrupted.push(job.id.clone()),
                    }
                }
                registry.insert(job);
            }

            let retention = self.retention();
            for id in &report.interrupted {
                if let Some(tracked) = registry.jobs.get_mut(id) {
                    tracked.fail(
                        JobFailure::new(FailureKind::Interrupted, "Local work was interrupted by a restart"),
                        retention,
                    );
                    tracked.publish();
                }
            }
            for (id, active, _) in &displaced {
                if let Some(tracked) = registry.jobs.get_mut(id) {
                    let message = format!("Not resumed: {} job {active} is already active", tracked.job.kind);
                    tracked.cancelled.store(true, Ordering::SeqCst);
                    tracked.fail(JobFailure::new(FailureKind::Interrupted, message), retention);
                    tracked.publish();
                }
            }
        }

        for id in report.interrupted.iter().chain(displaced.iter().map(|(id, _, _)| id)) {
            if let Some(job) = self.get(id).await {
                self.persist(&job).await;
            }
        }

        for (id, _, remote_id) in displaced {
            if let Err(err) = self.inner.executor.cancel(&remote_id).await {
                tracing::warn!(job_id = %id, remote_id = %remote_id, error = %err, "remote cancel of displaced job failed");
            }
            report.displaced.push(id);
        }

        for (id, remote_id) in to_query {
            let finished = match self.inner.executor.status(&remote_id).await {
                Ok(status) => self.apply_remote_status(&id, &status).await,
                Err(err) => {
                    tracing::warn!(job_id = %id, error = %err, "status query for restored job failed");
                    false
                }
            };
            if !finished {
                self.schedule_reconciliation(id.clone(), remote_id);
                report.resumed.push(id);
            }
        }

        tracing::info!(
            restored = report.restored,
            resumed = report.resumed.len(),
            interrupted = report.interrupted.len(),
            displaced = report.displaced.len(),
            "restored jobs"
        );
        report
    }

    /// Restore from the configured store. A manager without one restores nothing.
    pub async fn restore_from_store(&self) -> DomainResult<RestoreReport> {
        let Some(store) = &self.inner.store else {
            return Ok(RestoreReport::default());
        };
        let jobs = store.load_all().await?;
        Ok(self.restore(JobSetSnapshot::new(jobs)).await)
    }

    /// Fold one remote status into the job. Returns true when polling should stop.
    pub async fn apply_remote_status(&self, id: &JobId, status: &RemoteStatus) -> bool {
        let retention = self.retention();
        let (job, promotion) = {
            let mut registry = self.inner.registry.write().await;
            let Some(tracked) = registry.jobs.get_mut(id) else {
                return true;
            };
            if tracked.job.is_terminal() {
                tracing::debug!(job_id = %id, state = %tracked.job.state, "discarding late remote status");
                return true;
            }

            if tracked.job.state == JobState::Initializing
                && matches!(status.state, RemoteState::Running | RemoteState::Complete)
            {
                tracked.transition(JobState::Running);
            }

            match status.state {
                RemoteState::Pending => {}
                RemoteState::Running => apply_running(&mut tracked.job, status, retention),
                RemoteState::Complete => {
                    apply_running(&mut tracked.job, status, retention);
                    tracked.transition(JobState::Complete);
                }
                RemoteState::Error => {
                    let reason = status
                        .error
                        .clone()
                        .or_else(|| status.message.clone())
                        .unwrap_or_else(|| "remote job failed".to_string());
                    let err = DomainError::RemoteReported(reason);
                    tracked.fail(JobFailure::from(&err), retention);
                }
                RemoteState::Cancelled => {
                    tracked.cancelled.store(true, Ordering::SeqCst);
                    tracked.transition(JobState::Cancelled);
                }
            }
            tracked.publish();

            let job = tracked.job.clone();
            if !job.is_terminal() {
                return false;
            }
            let promotion = registry.release(job.kind, id);
            (job, promotion)
        };

        tracing::info!(job_id = %id, state = %job.state, "remote job finished");
        self.persist(&job).await;
        self.promote(promotion).await;
        true
    }

    // ------------------------------------------------------------------------
    // Launching
    // ------------------------------------------------------------------------

    async fn launch_remote(&self, id: &JobId) -> DomainResult<Job> {
        let (kind, params) = {
            let registry = self.inner.registry.read().await;
            let tracked = registry
                .jobs
                .get(id)
                .ok_or_else(|| DomainError::JobNotFound(id.clone()))?;
            (tracked.job.kind, tracked.job.metadata.clone())
        };

        let started = self.inner.executor.start(kind, &params).await;
        let retention = self.retention();

        match started {
            Ok(remote_id) => {
                let (job, proceed) = {
                    let mut registry = self.inner.registry.write().await;
                    let tracked = registry
                        .jobs
                        .get_mut(id)
                        .ok_or_else(|| DomainError::JobNotFound(id.clone()))?;
                    tracked.job.remote_id = Some(remote_id.clone());
                    let proceed = tracked.job.state == JobState::Initializing;
                    if proceed {
                        tracked.transition(JobState::Running);
                        tracked.job.push_log(
                            LogEntry::new(format!("Started remotely as {remote_id}"), LogSeverity::Info),
                            retention,
                        );
                    }
                    tracked.publish();
                    (tracked.job.clone(), proceed)
                };
                self.persist(&job).await;

                if proceed {
                    tracing::info!(job_id = %id, remote_id = %remote_id, "remote job started");
                    self.schedule_reconciliation(id.clone(), remote_id);
                } else if let Err(err) = self.inner.executor.cancel(&remote_id).await {
                    tracing::warn!(job_id = %id, error = %err, "cancel of late-started remote job failed");
                }
                Ok(job)
            }
            Err(err) => Err(self.start_failed(id, kind, &err).await),
        }
    }

    async fn start_failed(&self, id: &JobId, kind: JobKind, err: &RemoteError) -> DomainError {
        let error = DomainError::StartFailed {
            job_id: id.clone(),
            reason: err.to_string(),
        };
        tracing::error!(job_id = %id, kind = %kind, error = %err, "remote start failed");

        let (job, promotion) = {
            let mut registry = self.inner.registry.write().await;
            let job = registry.jobs.get_mut(id).map(|tracked| {
                if !tracked.job.is_terminal() {
                    tracked.fail(JobFailure::from(&error), self.retention());
                    tracked.publish();
                }
                tracked.job.clone()
            });
            (job, registry.release(kind, id))
        };
        if let Some(job) = job {
            self.persist(&job).await;
        }
        self.promote(promotion).await;
        error
    }

    fn schedule_reconciliation(&self, id: JobId, remote_id: RemoteJobId) {
        let poller = ReconciliationPoller::new();
        let manager = self.clone();
        let job_id = id.clone();
        let run = poller.start(self.inner.config.poll, move || {
            let manager = manager.clone();
            let id = job_id.clone();
            let remote_id = remote_id.clone();
            async move { manager.reconcile_once(&id, &remote_id).await }
        });

        let manager = self.clone();
        let registered = poller.clone();
        tokio::spawn(async move {
            {
                let mut registry = manager.inner.registry.write().await;
                let live = registry.jobs.get(&id).is_some_and(|t| !t.job.is_terminal());
                if live {
                    registry.pollers.insert(id.clone(), registered);
                } else {
                    registered.stop();
                }
            }
            let outcome = run.outcome().await;
            manager.poll_finished(&id, outcome).await;
        });
    }

    async fn reconcile_once(&self, id: &JobId, remote_id: &RemoteJobId) -> Result<bool, RemoteError> {
        {
            let registry = self.inner.registry.read().await;
            match registry.jobs.get(id) {
                Some(tracked) if !tracked.job.is_terminal() => {}
                _ => return Ok(true),
            }
        }
        let status = self.inner.executor.status(remote_id).await?;
        Ok(self.apply_remote_status(id, &status).await)
    }

    async fn poll_finished(&self, id: &JobId, outcome: PollOutcome) {
        let retention = self.retention();
        let (job, promotion) = {
            let mut registry = self.inner.registry.write().await;
            registry.pollers.remove(id);

            let PollOutcome::Exhausted { attempts, last_error } = outcome else {
                return;
            };
            let Some(tracked) = registry.jobs.get_mut(id) else {
                return;
            };
            if tracked.job.is_terminal() {
                return;
            }

            let err = DomainError::RemoteTimeout { attempts };
            if let Some(last_error) = last_error {
                tracked.job.push_log(
                    LogEntry::new(format!("Last status error: {last_error}"), LogSeverity::Warning),
                    retention,
                );
            }
            tracked.fail(JobFailure::from(&err), retention);
            tracked.publish();
            let job = tracked.job.clone();
            (job.clone(), registry.release(job.kind, id))
        };

        tracing::warn!(job_id = %id, "reconciliation gave up; the job may still be running remotely");
        self.persist(&job).await;
        self.promote(promotion).await;
    }

    async fn promote(&self, promotion: Option<Promotion>) {
        if let Some(Promotion { id, launch, job }) = promotion {
            self.persist(&job).await;
            self.dispatch(id, launch);
        }
    }

    fn dispatch(&self, id: JobId, launch: Launch) {
        let manager = self.clone();
        let task: BoxFuture<'static, ()> = async move {
            match launch {
                Launch::Remote => {
                    if let Err(err) = manager.launch_remote(&id).await {
                        tracing::warn!(job_id = %id, error = %err, "queued job failed to start");
                    }
                }
                Launch::Local(work) => manager.run_local(id, work).await,
            }
        }
        .boxed();
        tokio::spawn(task);
    }

    async fn run_local(&self, id: JobId, work: LocalWork) {
        let cancelled = {
            let registry = self.inner.registry.read().await;
            match registry.jobs.get(&id) {
                Some(tracked) => Arc::clone(&tracked.cancelled),
                None => return,
            }
        };
        let ctx = JobContext {
            manager: self.clone(),
            id: id.clone(),
            cancelled,
        };

        let work = work.into_inner().unwrap_or_else(PoisonError::into_inner);
        let result = match tokio::spawn(work(ctx)).await {
            Ok(result) => result,
            Err(err) => Err(DomainError::GenerationFailed(format!("job work aborted: {err}"))),
        };
        self.finish_local(&id, result).await;
    }

    async fn finish_local(&self, id: &JobId, result: DomainResult<Value>) {
        let retention = self.retention();
        let (job, promotion) = {
            let mut registry = self.inner.registry.write().await;
            let Some(tracked) = registry.jobs.get_mut(id) else {
                return;
            };
            if tracked.job.is_terminal() {
                tracing::debug!(job_id = %id, state = %tracked.job.state, "discarding late local result");
                return;
            }

            match result {
                Ok(output) => {
                    tracked.job.output = Some(output);
                    tracked.transition(JobState::Complete);
                }
                Err(err) => {
                    tracing::warn!(job_id = %id, error = %err, "local job failed");
                    tracked.fail(JobFailure::from(&err), retention);
                }
            }
            tracked.publish();
            let job = tracked.job.clone();
            (job.clone(), registry.release(job.kind, id))
        };

        self.persist(&job).await;
        self.promote(promotion).await;
    }

    async fn persist(&self, job: &Job) {
        if let Some(store) = &self.inner.store {
            if let Err(err) = store.upsert(job).await {
                tracing::warn!(job_id = %job.id, error = %err, "failed to persist job");
            }
        }
    }
}

/// Fold a non-terminal remote status: progress, stage switch, items, message.
fn apply_running(job: &mut Job, status: &RemoteStatus, retention: usize) {
    job.advance_progress(status.progress);

    if let Some(stage) = &status.stage {
        if job.current_stage.as_deref() != Some(stage.as_str()) {
            if let Some(previous) = job.current_stage.clone() {
                if job.stage(&previous).is_some_and(|s| s.state == StageState::Running) {
                    job.apply_stage_patch(&previous, StagePatch::state(StageState::Complete));
                }
            }
            job.apply_stage_patch(stage, StagePatch::state(StageState::Running));
        }
    }

    if let (Some(completed), Some(total)) = (status.completed_items, status.total_items) {
        job.set_items(completed, total, status.current_item.clone());
    }

    if let Some(message) = &status.message {
        let repeated = job.logs.back().is_some_and(|l| &l.message == message);
        if !repeated {
            job.push_log(LogEntry::new(message.clone(), LogSeverity::Info), retention);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockRemoteExecutor;
    use serde_json::json;
    use std::time::Duration;

    fn manager(executor: &Arc<MockRemoteExecutor>) -> JobLifecycleManager {
        let config = JobManagerConfig {
            poll: PollConfig::new(Duration::from_millis(100), 10),
            log_retention: 50,
        };
        JobLifecycleManager::new(Arc::clone(executor) as Arc<dyn RemoteExecutor>, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_job_runs_remotely() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);

        let job = manager
            .start_job(StartJobRequest::new(JobKind::Outline).with_params(json!({"pitch": "p1"})))
            .await
            .unwrap();

        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.remote_id.as_ref().map(RemoteJobId::as_str), Some("remote-1"));
        assert_eq!(job.stages.len(), JobKind::Outline.default_stages().len());
        assert_eq!(executor.started(), vec![(JobKind::Outline, json!({"pitch": "p1"}))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_stage_switch_completes_previous_stage() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);
        let job = manager.start_job(StartJobRequest::new(JobKind::Writer)).await.unwrap();

        manager
            .apply_remote_status(&job.id, &RemoteStatus::running(0.2).with_stage("Load Pitch"))
            .await;
        manager
            .apply_remote_status(
                &job.id,
                &RemoteStatus::running(0.1)
                    .with_stage("Generate Script")
                    .with_message("writing act one"),
            )
            .await;

        let job = manager.get(&job.id).await.unwrap();
        assert_eq!(job.stage("Load Pitch").unwrap().state, StageState::Complete);
        assert_eq!(job.stage("Generate Script").unwrap().state, StageState::Running);
        assert!((job.progress - 0.2).abs() < f64::EPSILON);
        assert_eq!(job.logs.back().unwrap().message, "writing act one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_is_reported() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);
        let job = manager.start_job(StartJobRequest::new(JobKind::Director)).await.unwrap();

        let done = manager
            .apply_remote_status(&job.id, &RemoteStatus::failed("out of memory"))
            .await;
        assert!(done);

        let job = manager.get(&job.id).await.unwrap();
        assert_eq!(job.state, JobState::Error);
        let failure = job.error.unwrap();
        assert_eq!(failure.kind, FailureKind::RemoteReported);
        assert!(failure.message.contains("out of memory"));
        assert!(manager.active_job(JobKind::Director).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_frees_slot() {
        let executor = Arc::new(MockRemoteExecutor::new());
        executor.fail_next_start(RemoteError::Unavailable("connection refused".into()));
        let manager = manager(&executor);

        let err = manager
            .start_job(StartJobRequest::new(JobKind::Storyboard).with_id("sb-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StartFailed { .. }));

        let failed = manager.get(&JobId::from("sb-1")).await.unwrap();
        assert_eq!(failed.state, JobState::Error);
        assert_eq!(failed.error.unwrap().kind, FailureKind::StartFailed);

        let retry = manager.start_job(StartJobRequest::new(JobKind::Storyboard)).await.unwrap();
        assert_eq!(retry.state, JobState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_rejected() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);
        manager
            .start_job(StartJobRequest::new(JobKind::Outline).with_id("same"))
            .await
            .unwrap();
        let err = manager
            .start_job(StartJobRequest::new(JobKind::Writer).with_id("same"))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::DuplicateJob(JobId::from("same")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_for_unknown_job_are_reported() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);
        let missing = JobId::from("missing");
        assert_eq!(
            manager.update_stage(&missing, "x", StagePatch::state(StageState::Running)).await,
            UpdateOutcome::UnknownJob
        );
        assert_eq!(manager.set_progress(&missing, 0.5).await, UpdateOutcome::UnknownJob);
        assert!(!manager.append_log(&missing, "hello", LogSeverity::Info).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_job_completes_with_output() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);

        let job = manager
            .start_local_job(StartJobRequest::new(JobKind::Ingestion), |ctx| async move {
                ctx.stage("Extract Entities", StageState::Running).await;
                ctx.log("extracting").await;
                ctx.items(1, 2, Some("attempt 1".into())).await;
                ctx.stage("Extract Entities", StageState::Complete).await;
                Ok(json!({"entities": 2}))
            })
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Running);

        let done = manager.wait_until_terminal(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Complete);
        assert_eq!(done.output, Some(json!({"entities": 2})));
        assert_eq!(done.stage("Extract Entities").unwrap().state, StageState::Complete);
        assert!((done.progress - 1.0).abs() < f64::EPSILON);
        assert!(done.logs.iter().any(|l| l.message == "extracting"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_job_failure_kind_is_kept() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);

        let job = manager
            .start_local_job(StartJobRequest::new(JobKind::Ingestion), |_ctx| async move {
                Err(DomainError::InsufficientAttempts {
                    requested: 3,
                    succeeded: 1,
                    required: 2,
                })
            })
            .await
            .unwrap();

        let done = manager.wait_until_terminal(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Error);
        assert_eq!(done.error.unwrap().kind, FailureKind::InsufficientAttempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_completed_keeps_active_jobs() {
        let executor = Arc::new(MockRemoteExecutor::new());
        let manager = manager(&executor);
        let running = manager.start_job(StartJobRequest::new(JobKind::Outline)).await.unwrap();
        let finished = manager.start_job(StartJobRequest::new(JobKind::Writer)).await.unwrap();
        manager.cancel(&finished.id).await.unwrap();

        let cleared = manager.clear_completed().await;
        assert_eq!(cleared, vec![finished.id.clone()]);
        assert!(manager.get(&finished.id).await.is_none());
        assert_eq!(manager.list_all().await.len(), 1);
        assert_eq!(manager.list_active().await[0].id, running.id);
    }
}
