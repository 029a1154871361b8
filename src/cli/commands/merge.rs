//! Offline consensus merge over saved extraction attempts.
//!
//! Each file is one attempt: either a JSON list of `{"name", "type"}`
//! candidates or a raw model response in the extraction format.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, RawCandidate};
use crate::services::extraction_consensus::{AttemptOutput, ConsensusResult, ExtractionConsensus};
use crate::services::response_parsing::parse_candidates;

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Attempt files, in attempt order
    #[arg(required = true, num_args = 2..)]
    pub files: Vec<PathBuf>,

    /// Attempts that must agree; unanimous by default
    #[arg(short, long)]
    pub min_agreement: Option<usize>,

    /// Name similarity at which spellings are merged (0-1]
    #[arg(long)]
    pub similarity: Option<f64>,

    /// Also list entities below the threshold
    #[arg(long)]
    pub show_rejected: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct MergeOutput {
    #[serde(flatten)]
    pub result: ConsensusResult,
    #[serde(skip)]
    pub show_rejected: bool,
}

impl CommandOutput for MergeOutput {
    fn to_human(&self) -> String {
        let result = &self.result;
        let formatter = TableFormatter::new();
        let mut lines = vec![format!(
            "{} entit(ies) agreed by at least {} of {} attempt(s):",
            result.entities.len(),
            result.threshold,
            result.attempts_succeeded
        )];
        if !result.entities.is_empty() {
            lines.push(formatter.format_entities(&result.entities));
        }
        if self.show_rejected && !result.rejected.is_empty() {
            lines.push(format!("\nBelow threshold ({}):", result.rejected.len()));
            lines.push(formatter.format_entities(&result.rejected));
        }
        for warning in &result.warnings {
            lines.push(format!("warning: {warning}"));
        }
        lines.join("\n")
    }
}

/// Read one attempt file.
pub fn read_attempt(path: &Path) -> Result<Vec<RawCandidate>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if let Ok(candidates) = serde_json::from_str::<Vec<RawCandidate>>(&text) {
        return Ok(candidates);
    }
    parse_candidates(&text).with_context(|| format!("No extraction candidates in {}", path.display()))
}

pub fn execute(args: MergeArgs, config: &Config, json_mode: bool) -> Result<()> {
    let mut consensus_config = config.consensus.clone();
    consensus_config.attempts = args.files.len();
    consensus_config.min_surviving_attempts = consensus_config.min_surviving_attempts.min(args.files.len());
    if let Some(min) = args.min_agreement {
        consensus_config.min_agreement = Some(min);
    }
    if let Some(similarity) = args.similarity {
        consensus_config.similarity_threshold = similarity;
    }

    let outputs = args
        .files
        .iter()
        .enumerate()
        .map(|(attempt, path)| Ok(AttemptOutput::new(attempt, read_attempt(path)?)))
        .collect::<Result<Vec<_>>>()?;

    let consensus = ExtractionConsensus::from_config(&consensus_config)?;
    let result = consensus.merge(&outputs, args.files.len())?;

    output(
        &MergeOutput {
            result,
            show_rejected: args.show_rejected,
        },
        json_mode,
    );
    Ok(())
}
