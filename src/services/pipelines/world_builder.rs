//! World-bible generation.
//!
//! World context is generated first and its settled values are handed to the
//! entity fields as facts, so every description agrees with the same world.
//! Entity fields follow one entity type per stage. Fields that fail stay in
//! the record with status `error` for a human to fix or regenerate; the job
//! then fails with the field's error while the partial bible stays as its
//! output.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::world_bible::{schema_for, WORLD_CONTEXT_CATEGORY};
use crate::domain::models::{ConfirmedEntity, EntityType, FieldStatus, Job, JobKind, Record, StageState};
use crate::domain::ports::{GenerationContext, GenerationProvider};
use crate::services::field_population::{FieldFailure, FieldPopulationEngine};
use crate::services::job_lifecycle::{JobContext, JobLifecycleManager, StartJobRequest};

pub const STAGE_WORLD: &str = "Generate World Context";
pub const STAGE_CHARACTERS: &str = "Generate Character Descriptions";
pub const STAGE_LOCATIONS: &str = "Generate Location Descriptions";
pub const STAGE_PROPS: &str = "Generate Prop Descriptions";

const ENTITY_STAGES: [(&str, EntityType); 3] = [
    (STAGE_CHARACTERS, EntityType::Character),
    (STAGE_LOCATIONS, EntityType::Location),
    (STAGE_PROPS, EntityType::Prop),
];

/// Longest source excerpt passed along with each field prompt.
const SOURCE_EXCERPT_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldBible {
    pub entities: Vec<ConfirmedEntity>,
    pub record: Record,
    /// Keys of fields left in `error`
    pub failed_fields: Vec<String>,
}

pub struct WorldBuilderPipeline {
    engine: FieldPopulationEngine,
    provider: Arc<dyn GenerationProvider>,
}

impl WorldBuilderPipeline {
    pub fn new(engine: FieldPopulationEngine, provider: Arc<dyn GenerationProvider>) -> Self {
        Self { engine, provider }
    }

    pub async fn run(
        &self,
        ctx: &JobContext,
        entities: &[ConfirmedEntity],
        source: Option<&str>,
    ) -> DomainResult<WorldBible> {
        let mut record = self.engine.initialize(&schema_for(entities));
        let total = record.fields.len() as u64;
        let mut context = GenerationContext::new();
        if let Some(source) = source {
            context = context.with_source(excerpt(source));
        }

        ctx.ensure_active()?;
        ctx.log(format!("Building world bible: {total} fields for {} entities", entities.len()))
            .await;
        let mut failures = self
            .run_stage(ctx, &mut record, &context, STAGE_WORLD, |category| {
                category == WORLD_CONTEXT_CATEGORY
            })
            .await?;

        for field in record.in_category(WORLD_CONTEXT_CATEGORY) {
            if let (FieldStatus::Complete | FieldStatus::Edited, Some(value)) = (field.status, &field.value) {
                context.facts.insert(field.key().to_string(), value.clone());
            }
        }

        for (stage, entity_type) in ENTITY_STAGES {
            let tags: BTreeSet<&str> = entities
                .iter()
                .filter(|e| e.entity_type == entity_type)
                .map(|e| e.tag.as_str())
                .collect();
            failures.extend(
                self.run_stage(ctx, &mut record, &context, stage, |category| tags.contains(category))
                    .await?,
            );
        }

        let failed_fields: Vec<String> = record
            .fields
            .iter()
            .filter(|f| f.status == FieldStatus::Error)
            .map(|f| f.key().to_string())
            .collect();
        let bible = WorldBible {
            entities: entities.to_vec(),
            record,
            failed_fields,
        };

        match first_failure(failures) {
            None => Ok(bible),
            Some(err) => {
                ctx.warn(format!("{} fields need attention", bible.failed_fields.len()))
                    .await;
                ctx.set_output(serde_json::to_value(&bible)?).await;
                Err(err)
            }
        }
    }

    async fn run_stage<F>(
        &self,
        ctx: &JobContext,
        record: &mut Record,
        context: &GenerationContext,
        stage: &str,
        in_stage: F,
    ) -> DomainResult<Vec<FieldFailure>>
    where
        F: Fn(&str) -> bool,
    {
        ctx.ensure_active()?;
        if !record.fields.iter().any(|f| in_stage(f.category())) {
            ctx.stage_with_message(stage, StageState::Skipped, "nothing to generate")
                .await;
            return Ok(Vec::new());
        }

        ctx.stage(stage, StageState::Running).await;
        let report = self
            .engine
            .populate_where(record, self.provider.as_ref(), context, |f| in_stage(f.category()))
            .await;

        for failure in &report.failed {
            ctx.warn(failure.error.to_string()).await;
        }
        let progress = record.progress();
        ctx.items(progress.settled() as u64, progress.total as u64, Some(stage.to_string()))
            .await;

        let (state, message) = if report.is_clean() {
            (StageState::Complete, format!("{} fields generated", report.generated.len()))
        } else {
            (
                StageState::Error,
                format!("{} generated, {} failed", report.generated.len(), report.failed.len()),
            )
        };
        ctx.stage_with_message(stage, state, message).await;
        Ok(report.failed)
    }

    /// Run as a local world-builder job. The job output is the [`WorldBible`],
    /// also when the job fails on unfinished fields.
    pub async fn start(
        self: Arc<Self>,
        manager: &JobLifecycleManager,
        entities: Vec<ConfirmedEntity>,
        source: Option<String>,
    ) -> DomainResult<Job> {
        let request = StartJobRequest::new(JobKind::WorldBuilder).with_params(json!({
            "entities": entities.len(),
        }));
        manager
            .start_local_job(request, move |ctx| async move {
                let bible = self.run(&ctx, &entities, source.as_deref()).await?;
                Ok(serde_json::to_value(&bible)?)
            })
            .await
    }
}

/// The error a failed build reports: word-count failures first, since those
/// leave a draft behind for a human to fix.
fn first_failure(failures: Vec<FieldFailure>) -> Option<DomainError> {
    let validation = failures
        .iter()
        .position(|f| matches!(f.error, DomainError::FieldValidation { .. }));
    let idx = validation.unwrap_or(0);
    failures.into_iter().nth(idx).map(|f| f.error)
}

fn excerpt(source: &str) -> String {
    match source.char_indices().nth(SOURCE_EXCERPT_CHARS) {
        Some((end, _)) => source[..end].to_string(),
        None => source.to_string(),
    }
}
