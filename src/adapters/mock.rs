//! Scripted adapters for tests and dry runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FieldSpec, Job, JobId, JobKind, RawCandidate, RemoteJobId};
use crate::domain::ports::{
    ExtractionInput, ExtractionProvider, GenerationContext, GenerationProvider, JobSnapshotRepository,
    ProviderError, RemoteError, RemoteExecutor, RemoteStatus, TextModel,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Extraction
// ============================================================================

/// Returns scripted extraction results in call order.
pub struct ScriptedExtractionProvider {
    responses: Mutex<VecDeque<Result<Vec<RawCandidate>, ProviderError>>>,
    calls: Mutex<u32>,
}

impl ScriptedExtractionProvider {
    pub fn new(responses: Vec<Result<Vec<RawCandidate>, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *lock(&self.calls)
    }
}

#[async_trait]
impl ExtractionProvider for ScriptedExtractionProvider {
    async fn extract_once(&self, _input: &ExtractionInput) -> Result<Vec<RawCandidate>, ProviderError> {
        *lock(&self.calls) += 1;
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Permanent("extraction script exhausted".to_string())))
    }
}

// ============================================================================
// Generation
// ============================================================================

enum Fallback {
    Text(String),
    /// As many words as the middle of the field's range
    Fitting,
    Fail,
}

/// Generates field text from per-field scripts, with a fallback for the rest.
pub struct ScriptedGenerationProvider {
    fallback: Fallback,
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
    seen: Mutex<Vec<(String, GenerationContext)>>,
}

impl ScriptedGenerationProvider {
    fn with_fallback(fallback: Fallback) -> Self {
        Self {
            fallback,
            scripts: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every field gets `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self::with_fallback(Fallback::Text(text.into()))
    }

    /// Every field gets text inside its word range.
    pub fn fitting() -> Self {
        Self::with_fallback(Fallback::Fitting)
    }

    /// Only `key` is scripted; other fields fail.
    pub fn sequence(key: impl Into<String>, responses: Vec<Result<String, ProviderError>>) -> Self {
        Self::with_fallback(Fallback::Fail).with_script(key, responses)
    }

    /// Script `key`. Once the script runs out, calls for `key` fail.
    pub fn with_script(self, key: impl Into<String>, responses: Vec<Result<String, ProviderError>>) -> Self {
        lock(&self.scripts).insert(key.into(), responses.into());
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn calls_for(&self, key: &str) -> usize {
        lock(&self.seen).iter().filter(|(k, _)| k == key).count()
    }

    /// Contexts passed for `key`, in call order.
    pub fn contexts_for(&self, key: &str) -> Vec<GenerationContext> {
        lock(&self.seen)
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerationProvider {
    async fn generate_field(&self, spec: &FieldSpec, context: &GenerationContext) -> Result<String, ProviderError> {
        lock(&self.seen).push((spec.key.clone(), context.clone()));

        if let Some(script) = lock(&self.scripts).get_mut(&spec.key) {
            return script
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Permanent(format!("script for {} exhausted", spec.key))));
        }

        match &self.fallback {
            Fallback::Text(text) => Ok(text.clone()),
            Fallback::Fitting => {
                let words = (spec.word_range.min + spec.word_range.max) / 2;
                Ok(vec!["word"; words].join(" "))
            }
            Fallback::Fail => Err(ProviderError::Permanent(format!("no script for {}", spec.key))),
        }
    }
}

// ============================================================================
// Text model
// ============================================================================

/// Returns scripted completions in call order and records the prompts.
pub struct ScriptedTextModel {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedTextModel {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// `(system, prompt)` pairs received so far.
    pub fn prompts(&self) -> Vec<(String, String)> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl TextModel for ScriptedTextModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        lock(&self.prompts).push((system.to_string(), prompt.to_string()));
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Permanent("completion script exhausted".to_string())))
    }
}

// ============================================================================
// Remote executor
// ============================================================================

#[derive(Default)]
struct RemoteLog {
    next_id: u64,
    start_failures: VecDeque<RemoteError>,
    started: Vec<(JobKind, Value)>,
    scripts: HashMap<String, VecDeque<Result<RemoteStatus, RemoteError>>>,
    last: HashMap<String, RemoteStatus>,
    status_calls: u32,
    cancelled: Vec<RemoteJobId>,
}

/// Remote executor that hands out `remote-1`, `remote-2`, ... and replays
/// scripted statuses per remote id. Unscripted polls repeat the last status,
/// or report running at 0.
#[derive(Default)]
pub struct MockRemoteExecutor {
    log: Mutex<RemoteLog>,
}

impl MockRemoteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self, error: RemoteError) {
        lock(&self.log).start_failures.push_back(error);
    }

    pub fn script(&self, remote_id: &str, statuses: Vec<Result<RemoteStatus, RemoteError>>) {
        lock(&self.log)
            .scripts
            .entry(remote_id.to_string())
            .or_default()
            .extend(statuses);
    }

    pub fn started(&self) -> Vec<(JobKind, Value)> {
        lock(&self.log).started.clone()
    }

    pub fn status_calls(&self) -> u32 {
        lock(&self.log).status_calls
    }

    pub fn cancelled(&self) -> Vec<RemoteJobId> {
        lock(&self.log).cancelled.clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockRemoteExecutor {
    async fn start(&self, kind: JobKind, params: &Value) -> Result<RemoteJobId, RemoteError> {
        let mut log = lock(&self.log);
        if let Some(error) = log.start_failures.pop_front() {
            return Err(error);
        }
        log.next_id += 1;
        log.started.push((kind, params.clone()));
        Ok(RemoteJobId::new(format!("remote-{}", log.next_id)))
    }

    async fn status(&self, remote_id: &RemoteJobId) -> Result<RemoteStatus, RemoteError> {
        let mut log = lock(&self.log);
        log.status_calls += 1;
        let key = remote_id.as_str().to_string();

        match log.scripts.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(Ok(status)) => {
                log.last.insert(key, status.clone());
                Ok(status)
            }
            Some(Err(err)) => Err(err),
            None => Ok(log
                .last
                .get(&key)
                .cloned()
                .unwrap_or_else(|| RemoteStatus::running(0.0))),
        }
    }

    async fn cancel(&self, remote_id: &RemoteJobId) -> Result<(), RemoteError> {
        lock(&self.log).cancelled.push(remote_id.clone());
        Ok(())
    }
}

// ============================================================================
// Job store
// ============================================================================

/// Job store kept in memory, in first-insert order.
#[derive(Default)]
pub struct InMemoryJobSnapshotRepository {
    jobs: RwLock<Vec<Job>>,
    failing: Mutex<bool>,
}

impl InMemoryJobSnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: RwLock::new(jobs),
            failing: Mutex::new(false),
        }
    }

    /// Make every later write fail with a database error.
    pub fn fail_writes(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.read().await.clone()
    }

    fn check_writable(&self) -> DomainResult<()> {
        if *lock(&self.failing) {
            Err(DomainError::DatabaseError("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobSnapshotRepository for InMemoryJobSnapshotRepository {
    async fn upsert(&self, job: &Job) -> DomainResult<()> {
        self.check_writable()?;
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn remove(&self, id: &JobId) -> DomainResult<()> {
        self.check_writable()?;
        self.jobs.write().await.retain(|j| &j.id != id);
        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<Job>> {
        Ok(self.jobs.read().await.clone())
    }
}
