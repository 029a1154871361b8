//! Consensus entity extraction.
//!
//! Runs `k` independent extraction attempts over the same input and keeps
//! only the entities enough attempts agree on. Merging depends on attempt
//! content and attempt index, never on the order attempts finish in.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ConsensusConfig, EntityType, ExtractedEntity, RawCandidate};
use crate::domain::ports::{ExtractionInput, ExtractionProvider, ProviderError};
use crate::services::name_matcher::NameMatcher;

/// How many attempts must agree before an entity is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "min")]
pub enum AgreementPolicy {
    /// Every attempt
    #[default]
    Unanimous,
    /// At least this many attempts
    MinAgreement(usize),
}

impl AgreementPolicy {
    /// Threshold for `k` requested attempts.
    pub fn threshold(&self, k: usize) -> usize {
        match self {
            Self::Unanimous => k,
            Self::MinAgreement(min) => (*min).clamp(1, k.max(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusOptions {
    pub attempts: usize,
    pub policy: AgreementPolicy,
    pub matcher: NameMatcher,
    /// Type preference when votes tie; earlier wins
    pub type_tie_order: Vec<EntityType>,
    pub attempt_retries: u32,
    pub attempt_timeout: Option<Duration>,
    pub concurrency_limit: usize,
    pub min_surviving_attempts: usize,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        Self::from(&ConsensusConfig::default())
    }
}

impl From<&ConsensusConfig> for ConsensusOptions {
    fn from(config: &ConsensusConfig) -> Self {
        Self {
            attempts: config.attempts,
            policy: config
                .min_agreement
                .map_or(AgreementPolicy::Unanimous, AgreementPolicy::MinAgreement),
            matcher: NameMatcher::new(config.similarity_threshold, config.min_substring_len),
            type_tie_order: vec![EntityType::Prop, EntityType::Location, EntityType::Character],
            attempt_retries: config.attempt_retries,
            attempt_timeout: config.attempt_timeout_ms.map(Duration::from_millis),
            concurrency_limit: config.concurrency_limit,
            min_surviving_attempts: config.min_surviving_attempts,
        }
    }
}

/// Candidates returned by one successful attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptOutput {
    pub attempt: usize,
    pub candidates: Vec<RawCandidate>,
}

impl AttemptOutput {
    pub fn new(attempt: usize, candidates: Vec<RawCandidate>) -> Self {
        Self {
            attempt,
            candidates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Entities at or above the agreement threshold
    pub entities: Vec<ExtractedEntity>,
    /// Entities below it, kept for review
    pub rejected: Vec<ExtractedEntity>,
    pub attempts_requested: usize,
    pub attempts_succeeded: usize,
    pub failed_attempts: Vec<usize>,
    pub threshold: usize,
    pub warnings: Vec<String>,
}

impl ConsensusResult {
    pub fn is_degraded(&self) -> bool {
        !self.failed_attempts.is_empty()
    }
}

struct Mention<'a> {
    attempt: usize,
    position: usize,
    name: &'a str,
    normalized: String,
    entity_type: EntityType,
}

pub struct ExtractionConsensus {
    options: ConsensusOptions,
}

impl ExtractionConsensus {
    pub fn new(options: ConsensusOptions) -> DomainResult<Self> {
        if options.attempts < 2 {
            return Err(DomainError::ValidationFailed(format!(
                "consensus needs at least 2 attempts, got {}",
                options.attempts
            )));
        }
        if options.concurrency_limit == 0 {
            return Err(DomainError::ValidationFailed(
                "consensus concurrency_limit must be at least 1".to_string(),
            ));
        }
        Ok(Self { options })
    }

    pub fn from_config(config: &ConsensusConfig) -> DomainResult<Self> {
        Self::new(ConsensusOptions::from(config))
    }

    pub fn options(&self) -> &ConsensusOptions {
        &self.options
    }

    /// Run the configured number of attempts against `provider` and merge them.
    pub async fn extract<P>(&self, provider: &P, input: &ExtractionInput) -> DomainResult<ConsensusResult>
    where
        P: ExtractionProvider + ?Sized,
    {
        let outputs = self.run_attempts(provider, input).await;
        self.merge(&outputs, self.options.attempts)
    }

    /// Run every attempt and keep the successful outputs, ordered by attempt.
    pub async fn run_attempts<P>(&self, provider: &P, input: &ExtractionInput) -> Vec<AttemptOutput>
    where
        P: ExtractionProvider + ?Sized,
    {
        self.run_attempts_observed(provider, input, |_| async {}).await
    }

    /// Like [`run_attempts`](Self::run_attempts), calling `on_finished` with
    /// the number of finished attempts (successful or not) as each one ends.
    pub async fn run_attempts_observed<P, F, Fut>(
        &self,
        provider: &P,
        input: &ExtractionInput,
        mut on_finished: F,
    ) -> Vec<AttemptOutput>
    where
        P: ExtractionProvider + ?Sized,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = ()>,
    {
        let k = self.options.attempts;
        tracing::info!(attempts = k, concurrency = self.options.concurrency_limit, "starting consensus extraction");

        let mut pending = pin!(stream::iter(0..k)
            .map(|attempt| async move { (attempt, self.run_attempt(provider, input, attempt).await) })
            .buffer_unordered(self.options.concurrency_limit));
        let mut results: Vec<(usize, Result<Vec<RawCandidate>, ProviderError>)> = Vec::with_capacity(k);
        while let Some(finished) = pending.next().await {
            results.push(finished);
            on_finished(results.len()).await;
        }

        let mut outputs = Vec::with_capacity(k);
        for (attempt, result) in results {
            match result {
                Ok(candidates) => {
                    tracing::debug!(attempt, candidates = candidates.len(), "extraction attempt succeeded");
                    outputs.push(AttemptOutput::new(attempt, candidates));
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "extraction attempt failed");
                }
            }
        }
        outputs.sort_by_key(|o| o.attempt);
        outputs
    }

    async fn run_attempt<P>(
        &self,
        provider: &P,
        input: &ExtractionInput,
        attempt: usize,
    ) -> Result<Vec<RawCandidate>, ProviderError>
    where
        P: ExtractionProvider + ?Sized,
    {
        let mut last_error = ProviderError::Permanent("no extraction tries were made".to_string());
        for try_number in 0..=self.options.attempt_retries {
            let call = provider.extract_once(input);
            let result = match self.options.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(
                        u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    )),
                },
                None => call.await,
            };

            match result {
                Ok(candidates) => return Ok(candidates),
                Err(err) if err.is_retryable() && try_number < self.options.attempt_retries => {
                    tracing::debug!(attempt, try_number, error = %err, "retrying extraction attempt");
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }

    /// Merge attempt outputs. `requested` is the number of attempts issued;
    /// outputs missing from `outputs` count as failed.
    pub fn merge(&self, outputs: &[AttemptOutput], requested: usize) -> DomainResult<ConsensusResult> {
        let mut ordered: Vec<&AttemptOutput> = outputs.iter().collect();
        ordered.sort_by_key(|o| o.attempt);
        if ordered.windows(2).any(|w| w[0].attempt == w[1].attempt) {
            return Err(DomainError::ValidationFailed(
                "attempt indices must be unique".to_string(),
            ));
        }

        let requested = requested.max(ordered.len());
        let survivors = ordered.len();
        let required = self.options.min_surviving_attempts.clamp(1, requested.max(1));
        if survivors < required {
            return Err(DomainError::InsufficientAttempts {
                requested,
                succeeded: survivors,
                required,
            });
        }

        let succeeded: BTreeSet<usize> = ordered.iter().map(|o| o.attempt).collect();
        let failed_attempts: Vec<usize> = (0..requested).filter(|i| !succeeded.contains(i)).collect();
        let threshold = self.options.policy.threshold(requested).min(survivors);

        let mut warnings = Vec::new();
        if survivors < requested {
            warnings.push(format!(
                "{} of {requested} extraction attempts failed; requiring {threshold} of {survivors} surviving attempts",
                requested - survivors
            ));
        }

        let mentions: Vec<Mention<'_>> = ordered
            .iter()
            .flat_map(|output| {
                output.candidates.iter().enumerate().map(|(position, candidate)| Mention {
                    attempt: output.attempt,
                    position,
                    name: candidate.name.trim(),
                    normalized: NameMatcher::normalize(&candidate.name),
                    entity_type: candidate.suggested_type,
                })
            })
            .filter(|m| !m.normalized.is_empty())
            .collect();

        let mut entities = Vec::new();
        let mut rejected = Vec::new();
        for cluster in self.cluster(&mentions) {
            let entity = self.build_entity(&cluster, requested);
            if entity.source_attempts.len() >= threshold {
                if entity.type_conflict {
                    warnings.push(format!(
                        "attempts disagree on the type of {:?}; chose {}",
                        entity.name, entity.suggested_type
                    ));
                }
                entities.push(entity);
            } else {
                rejected.push(entity);
            }
        }
        sort_entities(&mut entities);
        sort_entities(&mut rejected);

        tracing::info!(
            retained = entities.len(),
            rejected = rejected.len(),
            threshold,
            survivors,
            "consensus merge finished"
        );

        Ok(ConsensusResult {
            entities,
            rejected,
            attempts_requested: requested,
            attempts_succeeded: survivors,
            failed_attempts,
            threshold,
            warnings,
        })
    }

    /// Group mentions into connected components of the match relation.
    fn cluster<'m, 'a>(&self, mentions: &'m [Mention<'a>]) -> Vec<Vec<&'m Mention<'a>>> {
        let keys: Vec<&str> = mentions
            .iter()
            .map(|m| m.normalized.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut parent: Vec<usize> = (0..keys.len()).collect();
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                if self.options.matcher.normalized_match(keys[i], keys[j]) {
                    union(&mut parent, i, j);
                }
            }
        }

        let index: HashMap<&str, usize> = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let mut groups: BTreeMap<usize, Vec<&'m Mention<'a>>> = BTreeMap::new();
        for mention in mentions {
            let root = find(&mut parent, index[mention.normalized.as_str()]);
            groups.entry(root).or_default().push(mention);
        }
        groups.into_values().collect()
    }

    fn build_entity(&self, cluster: &[&Mention<'_>], requested: usize) -> ExtractedEntity {
        let source_attempts: BTreeSet<usize> = cluster.iter().map(|m| m.attempt).collect();

        // Most frequent spelling; ties go to the earliest (attempt, position).
        let mut spellings: BTreeMap<&str, (usize, (usize, usize))> = BTreeMap::new();
        for m in cluster {
            let entry = spellings.entry(m.name).or_insert((0, (m.attempt, m.position)));
            entry.0 += 1;
            entry.1 = entry.1.min((m.attempt, m.position));
        }
        let name = spellings
            .iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.1 .1.cmp(&a.1 .1)))
            .map(|(name, _)| (*name).to_string())
            .unwrap_or_default();

        let mut per_attempt: BTreeMap<usize, BTreeMap<EntityType, usize>> = BTreeMap::new();
        for m in cluster {
            *per_attempt
                .entry(m.attempt)
                .or_default()
                .entry(m.entity_type)
                .or_default() += 1;
        }
        let mut type_votes: BTreeMap<EntityType, usize> = BTreeMap::new();
        for counts in per_attempt.values() {
            if let Some(vote) = self.pick_type(counts) {
                *type_votes.entry(vote).or_default() += 1;
            }
        }
        let suggested_type = self.pick_type(&type_votes).unwrap_or(EntityType::Prop);

        #[allow(clippy::cast_precision_loss)]
        let confidence = source_attempts.len() as f64 / requested.max(1) as f64;

        ExtractedEntity {
            name,
            suggested_type,
            confidence: confidence.min(1.0),
            source_attempts,
            variants: spellings.keys().map(|s| (*s).to_string()).collect(),
            type_conflict: type_votes.len() > 1,
            type_votes,
            canonical_tag: None,
        }
    }

    /// Highest count wins; ties resolved by the configured tie order.
    fn pick_type(&self, counts: &BTreeMap<EntityType, usize>) -> Option<EntityType> {
        let rank = |t: &EntityType| {
            self.options
                .type_tie_order
                .iter()
                .position(|p| p == t)
                .unwrap_or(usize::MAX)
        };
        counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| rank(b.0).cmp(&rank(a.0))))
            .map(|(t, _)| *t)
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        // Smaller index becomes root so grouping order follows key order.
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[child] = root;
    }
}

fn sort_entities(entities: &mut [ExtractedEntity]) {
    entities.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.suggested_type.cmp(&b.suggested_type))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
}
