use serde_json::json;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Job, JobKind, StageState};
use crate::domain::ports::{ExtractionInput, ExtractionProvider};
use crate::services::extraction_consensus::{ConsensusResult, ExtractionConsensus};
use crate::services::job_lifecycle::{JobContext, JobLifecycleManager, StartJobRequest};

pub const STAGE_EXTRACT: &str = "Extract Entities";
pub const STAGE_CONSENSUS: &str = "Build Consensus";

/// Entity extraction over source text, merged by consensus.
pub struct IngestionPipeline {
    consensus: ExtractionConsensus,
    provider: Arc<dyn ExtractionProvider>,
}

impl IngestionPipeline {
    pub fn new(consensus: ExtractionConsensus, provider: Arc<dyn ExtractionProvider>) -> Self {
        Self { consensus, provider }
    }

    /// Items are the `k` attempts plus the merge, so progress tops out only
    /// once consensus is built.
    pub async fn run(&self, ctx: &JobContext, input: &ExtractionInput) -> DomainResult<ConsensusResult> {
        let k = self.consensus.options().attempts;
        let total = k as u64 + 1;

        ctx.ensure_active()?;
        ctx.stage(STAGE_EXTRACT, StageState::Running).await;
        ctx.log(format!("Running {k} independent extraction attempts")).await;
        ctx.items(0, total, None).await;
        let outputs = self
            .consensus
            .run_attempts_observed(self.provider.as_ref(), input, |finished| async move {
                ctx.items(finished as u64, total, Some(format!("attempt {finished} of {k}")))
                    .await;
            })
            .await;
        ctx.stage_with_message(
            STAGE_EXTRACT,
            StageState::Complete,
            format!("{} of {k} attempts succeeded", outputs.len()),
        )
        .await;

        ctx.ensure_active()?;
        ctx.stage(STAGE_CONSENSUS, StageState::Running).await;
        let result = self.consensus.merge(&outputs, k)?;
        for warning in &result.warnings {
            ctx.warn(warning.clone()).await;
        }
        ctx.stage_with_message(
            STAGE_CONSENSUS,
            StageState::Complete,
            format!(
                "{} entities agreed, {} rejected",
                result.entities.len(),
                result.rejected.len()
            ),
        )
        .await;
        ctx.items(total, total, Some(STAGE_CONSENSUS.to_string())).await;
        Ok(result)
    }

    /// Run as a local ingestion job. The job output is the consensus result.
    pub async fn start(self: Arc<Self>, manager: &JobLifecycleManager, input: ExtractionInput) -> DomainResult<Job> {
        let request = StartJobRequest::new(JobKind::Ingestion).with_params(json!({
            "source": input.source_name,
            "attempts": self.consensus.options().attempts,
        }));
        manager
            .start_local_job(request, move |ctx| async move {
                let result = self.run(&ctx, &input).await?;
                Ok(serde_json::to_value(&result)?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockRemoteExecutor, ScriptedExtractionProvider};
    use crate::domain::models::{EntityType, JobState, RawCandidate};
    use crate::domain::ports::RemoteExecutor;
    use crate::services::extraction_consensus::ConsensusOptions;
    use crate::services::job_lifecycle::JobManagerConfig;

    fn attempt(names: &[&str]) -> Vec<RawCandidate> {
        names
            .iter()
            .map(|n| RawCandidate::new(*n, EntityType::Character))
            .collect()
    }

    #[tokio::test]
    async fn test_ingestion_job_outputs_consensus() {
        let provider = Arc::new(ScriptedExtractionProvider::new(vec![
            Ok(attempt(&["Mei", "Wang Jun"])),
            Ok(attempt(&["Mei"])),
            Ok(attempt(&["MEI", "Wang-Jun"])),
        ]));
        let consensus = ExtractionConsensus::new(ConsensusOptions {
            concurrency_limit: 1,
            ..ConsensusOptions::default()
        })
        .unwrap();
        let pipeline = Arc::new(IngestionPipeline::new(consensus, provider));
        let manager = JobLifecycleManager::new(
            Arc::new(MockRemoteExecutor::new()) as Arc<dyn RemoteExecutor>,
            JobManagerConfig::default(),
        );

        let job = pipeline
            .start(&manager, ExtractionInput::new("chapter one").with_source_name("ch1.txt"))
            .await
            .unwrap();
        let done = manager.wait_until_terminal(&job.id).await.unwrap();

        assert_eq!(done.state, JobState::Complete);
        assert_eq!(done.stage(STAGE_EXTRACT).unwrap().message.as_deref(), Some("3 of 3 attempts succeeded"));
        assert_eq!(done.stage(STAGE_CONSENSUS).unwrap().state, StageState::Complete);
        assert_eq!(done.completed_items, Some(4));
        assert_eq!(done.total_items, Some(4));

        let result: ConsensusResult = serde_json::from_value(done.output.unwrap()).unwrap();
        let names: Vec<_> = result.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Mei"]);
        assert_eq!(result.rejected.len(), 1);
    }

    #[tokio::test]
    async fn test_ingestion_reports_each_finished_attempt() {
        let provider = Arc::new(ScriptedExtractionProvider::new(vec![
            Ok(attempt(&["Mei"])),
            Err(crate::domain::ports::ProviderError::Permanent("refused".into())),
            Ok(attempt(&["Mei"])),
        ]));
        let consensus = ExtractionConsensus::new(ConsensusOptions {
            concurrency_limit: 1,
            ..ConsensusOptions::default()
        })
        .unwrap();
        let pipeline = Arc::new(IngestionPipeline::new(consensus, provider));
        let manager = JobLifecycleManager::new(
            Arc::new(MockRemoteExecutor::new()) as Arc<dyn RemoteExecutor>,
            JobManagerConfig::default(),
        );

        let job = pipeline
            .start(&manager, ExtractionInput::new("chapter one"))
            .await
            .unwrap();
        let mut rx = manager.subscribe(&job.id).await.unwrap();
        let mut seen = Vec::new();
        loop {
            let job = rx.borrow_and_update().clone();
            if let Some(done) = job.completed_items {
                if seen.last() != Some(&done) {
                    seen.push(done);
                }
            }
            if job.is_terminal() {
                break;
            }
            rx.changed().await.unwrap();
        }

        let done = manager.get(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Complete);
        assert_eq!(seen.last(), Some(&4));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(done.current_item.as_deref(), Some(STAGE_CONSENSUS));
    }
}
