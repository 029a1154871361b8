//! Configuration CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration after all overrides
    Show,
    /// Check the configuration and report the first problem
    Validate,
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigShowOutput {
    pub source: String,
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        let yaml = serde_yaml::to_string(&self.config).unwrap_or_default();
        format!("# source: {}\n{yaml}", self.source)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigValidateOutput {
    pub valid: bool,
    pub source: String,
    pub error: Option<String>,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        match &self.error {
            None => format!("Configuration is valid ({})", self.source),
            Some(error) => format!("Configuration is invalid ({}): {error}", self.source),
        }
    }
}

/// Load from `path` when given, otherwise from the project hierarchy.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

fn describe_source(path: Option<&Path>) -> String {
    path.map_or_else(
        || ".greenlight/config.yaml + overrides".to_string(),
        |p| p.display().to_string(),
    )
}

pub fn execute(args: ConfigArgs, path: Option<&Path>, json_mode: bool) -> Result<()> {
    let source = describe_source(path);
    match args.command {
        ConfigCommands::Show => {
            let config = load(path).context("Failed to load configuration")?;
            output(&ConfigShowOutput { source, config }, json_mode);
        }
        ConfigCommands::Validate => {
            let result = load(path);
            let out = ConfigValidateOutput {
                valid: result.is_ok(),
                source,
                error: result.err().map(|e| format!("{e:#}")),
            };
            let valid = out.valid;
            output(&out, json_mode);
            if !valid {
                anyhow::bail!("configuration validation failed");
            }
        }
    }
    Ok(())
}
