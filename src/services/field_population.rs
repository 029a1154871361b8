//! Progressive field population.
//!
//! Drives every field of a [`Record`] from `pending` to `complete` or `error`
//! with bounded concurrency. Generated text is validated against the field's
//! word range and retried; a field that never fits keeps its closest draft so
//! a human can fix it. Edited fields are only replaced by an explicit
//! [`FieldPopulationEngine::regenerate_field`].

use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    word_count, Field, FieldSpec, FieldStatus, PopulationConfig, Record, RecordSchema,
};
use crate::domain::ports::{GenerationContext, GenerationProvider, ProviderError};

/// Receives every field status change.
pub trait FieldObserver: Send + Sync {
    fn on_field_update(&self, field: &Field);
}

impl<F> FieldObserver for F
where
    F: Fn(&Field) + Send + Sync,
{
    fn on_field_update(&self, field: &Field) {
        self(field);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationOptions {
    pub concurrency_limit: usize,
    pub max_attempts: u32,
}

impl Default for PopulationOptions {
    fn default() -> Self {
        Self::from(&PopulationConfig::default())
    }
}

impl From<&PopulationConfig> for PopulationOptions {
    fn from(config: &PopulationConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit,
            max_attempts: config.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    pub key: String,
    pub error: DomainError,
}

/// Summary of one populate pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationReport {
    pub generated: Vec<String>,
    pub failed: Vec<FieldFailure>,
    /// Fields left alone because they were settled or filtered out
    pub skipped: usize,
    pub provider_calls: u32,
}

impl PopulationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Valid { text: String },
    OutOfRange { draft: String, words: usize },
    Failed { error: ProviderError },
}

struct Generated {
    key: String,
    outcome: Outcome,
    calls: u32,
}

pub struct FieldPopulationEngine {
    options: PopulationOptions,
    observers: Vec<Arc<dyn FieldObserver>>,
}

impl FieldPopulationEngine {
    pub fn new(options: PopulationOptions) -> Self {
        Self {
            options,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FieldObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Create a record with every field pending.
    pub fn initialize(&self, schema: &RecordSchema) -> Record {
        Record::from_schema(schema)
    }

    /// Generate every pending or errored field.
    pub async fn populate<G>(
        &self,
        record: &mut Record,
        provider: &G,
        context: &GenerationContext,
    ) -> PopulationReport
    where
        G: GenerationProvider + ?Sized,
    {
        self.populate_where(record, provider, context, |_| true).await
    }

    /// Like [`populate`](Self::populate), restricted to fields `filter` accepts.
    pub async fn populate_where<G, F>(
        &self,
        record: &mut Record,
        provider: &G,
        context: &GenerationContext,
        filter: F,
    ) -> PopulationReport
    where
        G: GenerationProvider + ?Sized,
        F: Fn(&Field) -> bool,
    {
        let targets: Vec<FieldSpec> = record
            .fields
            .iter()
            .filter(|f| f.status.needs_generation() && filter(f))
            .map(|f| f.spec.clone())
            .collect();

        let mut report = PopulationReport {
            skipped: record.fields.len() - targets.len(),
            ..PopulationReport::default()
        };
        if targets.is_empty() {
            return report;
        }

        tracing::info!(fields = targets.len(), concurrency = self.options.concurrency_limit, "populating fields");
        for spec in &targets {
            if let Ok(field) = record.field_mut(&spec.key) {
                field.last_error = None;
                field.set_status(FieldStatus::Generating);
                self.notify(field);
            }
        }

        let mut results = stream::iter(targets)
            .map(|spec| async move { self.generate(spec, provider, context).await })
            .buffer_unordered(self.options.concurrency_limit.max(1));

        while let Some(generated) = results.next().await {
            self.apply(record, generated, &mut report);
        }
        report
    }

    /// Regenerate one field whatever its status, edited included.
    pub async fn regenerate_field<G>(
        &self,
        record: &mut Record,
        key: &str,
        provider: &G,
        context: &GenerationContext,
    ) -> DomainResult<FieldStatus>
    where
        G: GenerationProvider + ?Sized,
    {
        let spec = {
            let field = record.field_mut(key)?;
            field.last_error = None;
            field.set_status(FieldStatus::Generating);
            self.notify(field);
            field.spec.clone()
        };

        let generated = self.generate(spec, provider, context).await;
        let mut report = PopulationReport::default();
        self.apply(record, generated, &mut report);

        match report.failed.pop() {
            Some(failure) => Err(failure.error),
            None => Ok(FieldStatus::Complete),
        }
    }

    /// Record a human edit. The field is not regenerated by later passes.
    pub fn apply_edit(&self, record: &mut Record, key: &str, value: impl Into<String>) -> DomainResult<()> {
        let field = record.field_mut(key)?;
        field.value = Some(value.into());
        field.last_error = None;
        field.set_status(FieldStatus::Edited);
        self.notify(field);
        Ok(())
    }

    async fn generate<G>(&self, spec: FieldSpec, provider: &G, context: &GenerationContext) -> Generated
    where
        G: GenerationProvider + ?Sized,
    {
        let max_attempts = self.options.max_attempts.max(1);
        let mut calls = 0;
        let mut best: Option<(String, usize)> = None;
        let mut last_error = None;

        while calls < max_attempts {
            calls += 1;
            match provider.generate_field(&spec, context).await {
                Ok(text) => {
                    let text = text.trim().to_string();
                    let words = word_count(&text);
                    if spec.word_range.contains(words) {
                        return Generated {
                            key: spec.key,
                            outcome: Outcome::Valid { text },
                            calls,
                        };
                    }
                    tracing::debug!(
                        field = %spec.key,
                        attempt = calls,
                        words,
                        range = %spec.word_range,
                        "generated text outside word range"
                    );
                    let closer = best.as_ref().map_or(true, |(_, best_words)| {
                        spec.word_range.distance(words) <= spec.word_range.distance(*best_words)
                    });
                    if closer {
                        best = Some((text, words));
                    }
                }
                Err(err) => {
                    tracing::warn!(field = %spec.key, attempt = calls, error = %err, "field generation failed");
                    let retry = err.is_retryable();
                    last_error = Some(err);
                    if !retry {
                        break;
                    }
                }
            }
        }

        let outcome = match (best, last_error) {
            (Some((draft, words)), _) => Outcome::OutOfRange { draft, words },
            (None, Some(error)) => Outcome::Failed { error },
            (None, None) => Outcome::Failed {
                error: ProviderError::Permanent("no generation attempts made".to_string()),
            },
        };
        Generated {
            key: spec.key,
            outcome,
            calls,
        }
    }

    fn apply(&self, record: &mut Record, generated: Generated, report: &mut PopulationReport) {
        report.provider_calls += generated.calls;
        let Ok(field) = record.field_mut(&generated.key) else {
            tracing::warn!(field = %generated.key, "generated field no longer in record");
            return;
        };
        field.generation_attempt += generated.calls;

        match generated.outcome {
            Outcome::Valid { text } => {
                field.value = Some(text);
                field.last_error = None;
                field.set_status(FieldStatus::Complete);
                report.generated.push(generated.key);
            }
            Outcome::OutOfRange { draft, words } => {
                let error = DomainError::FieldValidation {
                    key: generated.key.clone(),
                    words,
                    min: field.spec.word_range.min,
                    max: field.spec.word_range.max,
                    attempts: generated.calls,
                };
                field.value = Some(draft);
                field.last_error = Some(error.to_string());
                field.set_status(FieldStatus::Error);
                report.failed.push(FieldFailure {
                    key: generated.key,
                    error,
                });
            }
            Outcome::Failed { error } => {
                let error = DomainError::GenerationFailed(error.to_string());
                field.last_error = Some(error.to_string());
                field.set_status(FieldStatus::Error);
                report.failed.push(FieldFailure {
                    key: generated.key,
                    error,
                });
            }
        }
        self.notify(field);
    }

    fn notify(&self, field: &Field) {
        for observer in &self.observers {
            observer.on_field_update(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::ScriptedGenerationProvider;
    use crate::domain::models::WordCountRange;
    use std::sync::Mutex;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn schema() -> RecordSchema {
        RecordSchema::new(vec![
            FieldSpec::new("world.setting", "world_context", "setting", WordCountRange::new(10, 24)),
            FieldSpec::new("world.mood", "world_context", "mood", WordCountRange::new(10, 24)),
        ])
    }

    fn engine() -> FieldPopulationEngine {
        FieldPopulationEngine::new(PopulationOptions::default())
    }

    #[tokio::test]
    async fn test_populate_completes_all_fields() {
        let provider = ScriptedGenerationProvider::always(words(12));
        let engine = engine();
        let mut record = engine.initialize(&schema());

        let report = engine.populate(&mut record, &provider, &GenerationContext::new()).await;

        assert_eq!(report.generated.len(), 2);
        assert!(report.is_clean());
        assert!(record.progress().is_finished());
        assert_eq!(record.field("world.mood").unwrap().generation_attempt, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_keeps_last_draft() {
        let provider = ScriptedGenerationProvider::sequence(
            "world.setting",
            vec![Ok(format!("{} first", words(29))), Ok(format!("{} second", words(29))), Ok(format!("{} third", words(29)))],
        );
        let engine = engine();
        let mut record = engine.initialize(&RecordSchema::new(vec![schema().fields[0].clone()]));

        let report = engine.populate(&mut record, &provider, &GenerationContext::new()).await;

        let field = record.field("world.setting").unwrap();
        assert_eq!(field.status, FieldStatus::Error);
        assert!(field.value.as_deref().unwrap().ends_with("third"));
        assert_eq!(field.generation_attempt, 3);
        assert_eq!(report.provider_calls, 3);
        assert!(matches!(
            report.failed[0].error,
            DomainError::FieldValidation { words: 30, attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_retry_recovers_within_budget() {
        let provider = ScriptedGenerationProvider::sequence(
            "world.setting",
            vec![Ok(words(3)), Err(ProviderError::Transient("429".into())), Ok(words(15))],
        );
        let engine = engine();
        let mut record = engine.initialize(&RecordSchema::new(vec![schema().fields[0].clone()]));

        let report = engine.populate(&mut record, &provider, &GenerationContext::new()).await;
        assert!(report.is_clean());
        assert_eq!(record.field("world.setting").unwrap().status, FieldStatus::Complete);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_retrying() {
        let provider = ScriptedGenerationProvider::sequence(
            "world.setting",
            vec![Err(ProviderError::Permanent("content policy".into())), Ok(words(12))],
        );
        let engine = engine();
        let mut record = engine.initialize(&RecordSchema::new(vec![schema().fields[0].clone()]));

        let report = engine.populate(&mut record, &provider, &GenerationContext::new()).await;
        let field = record.field("world.setting").unwrap();
        assert_eq!(field.status, FieldStatus::Error);
        assert!(field.value.is_none());
        assert_eq!(report.provider_calls, 1);
        assert!(matches!(report.failed[0].error, DomainError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn test_regenerate_passes_through_generating() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let engine = engine().with_observer(Arc::new(move |field: &Field| {
            sink.lock().unwrap().push((field.key().to_string(), field.status));
        }));
        let provider = ScriptedGenerationProvider::always(words(12));
        let mut record = engine.initialize(&schema());
        engine.apply_edit(&mut record, "world.mood", "hand written").unwrap();
        seen.lock().unwrap().clear();

        let status = engine
            .regenerate_field(&mut record, "world.mood", &provider, &GenerationContext::new())
            .await
            .unwrap();

        assert_eq!(status, FieldStatus::Complete);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("world.mood".to_string(), FieldStatus::Generating),
                ("world.mood".to_string(), FieldStatus::Complete),
            ]
        );
        assert_eq!(record.field("world.setting").unwrap().status, FieldStatus::Pending);
    }

    #[tokio::test]
    async fn test_regenerate_unknown_field() {
        let provider = ScriptedGenerationProvider::always(words(12));
        let engine = engine();
        let mut record = engine.initialize(&schema());
        let err = engine
            .regenerate_field(&mut record, "world.weather", &provider, &GenerationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::FieldNotFound("world.weather".into()));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_populate_where_filters_by_category() {
        let mut fields = schema().fields;
        fields.push(FieldSpec::new("CHAR_MEI.summary", "CHAR_MEI", "summary", WordCountRange::new(15, 24)));
        let provider = ScriptedGenerationProvider::always(words(16));
        let engine = engine();
        let mut record = engine.initialize(&RecordSchema::new(fields));

        let report = engine
            .populate_where(&mut record, &provider, &GenerationContext::new(), |f| {
                f.category() == "CHAR_MEI"
            })
            .await;

        assert_eq!(report.generated, vec!["CHAR_MEI.summary".to_string()]);
        assert_eq!(report.skipped, 2);
        assert_eq!(record.progress().pending, 2);
    }
}
