//! Pipeline stages that run as local jobs.

pub mod ingestion;
pub mod world_builder;

pub use ingestion::IngestionPipeline;
pub use world_builder::{WorldBible, WorldBuilderPipeline};
