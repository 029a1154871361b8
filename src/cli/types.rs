//! CLI type definitions
//!
//! Clap command structures for the `greenlight` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::config::ConfigArgs;
use crate::cli::commands::jobs::JobsArgs;
use crate::cli::commands::merge::MergeArgs;
use crate::cli::commands::tag::TagArgs;

#[derive(Parser, Debug)]
#[command(name = "greenlight")]
#[command(about = "Greenlight - pipeline jobs and consensus extraction", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file to use instead of .greenlight/config.yaml
    #[arg(short, long, global = true, env = "GREENLIGHT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and clear persisted pipeline jobs
    Jobs(JobsArgs),

    /// Merge extraction attempt files into one entity set
    Merge(MergeArgs),

    /// Format or parse canonical entity tags
    Tag(TagArgs),

    /// Show or validate the effective configuration
    Config(ConfigArgs),
}
