//! Pipeline job CLI commands.
//!
//! Reads the job store written by a running pipeline host.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::adapters::sqlite::{initialize_from_config, SqliteJobSnapshotRepository};
use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, Job, JobId, LogEntry};
use crate::domain::ports::JobSnapshotRepository;

const SHOWN_LOG_LINES: usize = 20;

#[derive(Args, Debug)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommands,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommands {
    /// List active jobs
    List {
        /// Include finished jobs
        #[arg(short, long)]
        all: bool,
    },
    /// Show job details, stages and recent log lines
    Show {
        /// Job ID
        id: String,
    },
    /// Remove finished jobs from the store
    Clear,
}

#[derive(Debug, serde::Serialize)]
pub struct JobListOutput {
    pub jobs: Vec<Job>,
    pub total: usize,
}

impl CommandOutput for JobListOutput {
    fn to_human(&self) -> String {
        if self.jobs.is_empty() {
            return "No jobs found.".to_string();
        }
        format!(
            "Found {} job(s):\n{}",
            self.total,
            TableFormatter::new().format_jobs(&self.jobs)
        )
    }
}

#[derive(Debug, serde::Serialize)]
pub struct JobDetailOutput {
    pub job: Job,
}

impl CommandOutput for JobDetailOutput {
    fn to_human(&self) -> String {
        let job = &self.job;
        let mut lines = vec![
            format!("Job: {}", job.id),
            format!("Kind: {}", job.kind),
            format!("State: {}", job.state),
            format!("Progress: {:.0}%", job.progress * 100.0),
        ];
        if let Some(remote) = &job.remote_id {
            lines.push(format!("Remote ID: {remote}"));
        }
        if let (Some(done), Some(total)) = (job.completed_items, job.total_items) {
            let current = job.current_item.as_deref().map(|c| format!(" ({c})")).unwrap_or_default();
            lines.push(format!("Items: {done}/{total}{current}"));
        }
        lines.push(format!("Started: {}", job.started_at.to_rfc3339()));
        if let Some(ended) = job.ended_at {
            lines.push(format!("Ended: {}", ended.to_rfc3339()));
        }
        if let Some(error) = &job.error {
            lines.push(format!("Error ({}): {}", error.kind.as_str(), error.message));
            lines.push(format!("Suggested recovery: {}", error.kind.recovery().as_str()));
        }

        if !job.stages.is_empty() {
            lines.push(String::new());
            lines.push(TableFormatter::new().format_stages(&job.stages));
        }

        if !job.logs.is_empty() {
            lines.push(String::new());
            lines.push("Recent log:".to_string());
            let skip = job.logs.len().saturating_sub(SHOWN_LOG_LINES);
            lines.extend(job.logs.iter().skip(skip).map(format_log));
            if job.dropped_logs > 0 {
                lines.push(format!("({} older entries dropped)", job.dropped_logs));
            }
        }

        lines.join("\n")
    }
}

fn format_log(entry: &LogEntry) -> String {
    format!(
        "  {} [{}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.severity.as_str(),
        entry.message
    )
}

#[derive(Debug, serde::Serialize)]
pub struct ClearOutput {
    pub removed: Vec<JobId>,
}

impl CommandOutput for ClearOutput {
    fn to_human(&self) -> String {
        match self.removed.len() {
            0 => "No finished jobs to clear.".to_string(),
            n => format!("Cleared {n} finished job(s)."),
        }
    }
}

pub async fn execute(args: JobsArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = initialize_from_config(&config.database)
        .await
        .with_context(|| format!("Failed to open job store at {}", config.database.path))?;
    let repo = SqliteJobSnapshotRepository::new(pool);

    match args.command {
        JobsCommands::List { all } => {
            let jobs: Vec<Job> = repo
                .load_all()
                .await?
                .into_iter()
                .filter(|job| all || !job.is_terminal())
                .collect();
            output(&JobListOutput { total: jobs.len(), jobs }, json_mode);
        }

        JobsCommands::Show { id } => {
            let job = repo
                .get(&JobId::new(id.as_str()))
                .await?
                .with_context(|| format!("Job not found: {id}"))?;
            output(&JobDetailOutput { job }, json_mode);
        }

        JobsCommands::Clear => {
            let mut removed = Vec::new();
            for job in repo.load_all().await?.into_iter().filter(Job::is_terminal) {
                repo.remove(&job.id).await?;
                removed.push(job.id);
            }
            tracing::info!(removed = removed.len(), "cleared finished jobs");
            output(&ClearOutput { removed }, json_mode);
        }
    }

    Ok(())
}
