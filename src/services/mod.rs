pub mod extraction_consensus;
pub mod field_population;
pub mod job_lifecycle;
pub mod name_matcher;
pub mod pipelines;
pub mod reconciliation_poller;
pub mod response_parsing;

pub use extraction_consensus::{
    AgreementPolicy, AttemptOutput, ConsensusOptions, ConsensusResult, ExtractionConsensus,
};
pub use field_population::{
    FieldFailure, FieldObserver, FieldPopulationEngine, PopulationOptions, PopulationReport,
};
pub use job_lifecycle::{
    JobContext, JobLifecycleManager, JobManagerConfig, RestoreReport, StartJobRequest,
    UpdateOutcome,
};
pub use name_matcher::NameMatcher;
pub use pipelines::{IngestionPipeline, WorldBible, WorldBuilderPipeline};
pub use reconciliation_poller::{PollConfig, PollOutcome, PollRun, ReconciliationPoller};
pub use response_parsing::{extract_json_block, parse_candidates};
