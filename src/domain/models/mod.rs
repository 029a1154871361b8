pub mod config;
pub mod entity;
pub mod field;
pub mod job;
pub mod world_bible;

pub use config::{
    Config, ConsensusConfig, DatabaseConfig, JobsConfig, LoggingConfig, PollingConfig,
    PopulationConfig, RateLimitConfig,
};
pub use entity::{
    scan_tags, CanonicalTag, ConfirmedEntity, EntityConfirmation, EntityDecision, EntityType,
    ExtractedEntity, RawCandidate,
};
pub use field::{
    word_count, Field, FieldSpec, FieldStatus, Record, RecordProgress, RecordSchema,
    WordCountRange,
};
pub use job::{
    FailureKind, Job, JobFailure, JobId, JobKind, JobSetSnapshot, JobState, LogEntry,
    LogSeverity, RecoveryHint, RemoteJobId, Stage, StagePatch, StageState,
};
