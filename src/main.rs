//! Greenlight CLI entry point.

use clap::Parser;

use greenlight::cli::commands::{config, jobs, merge, tag};
use greenlight::cli::{Cli, Commands};
use greenlight::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let loaded = config::load(cli.config.as_deref());

    let log_config = loaded
        .as_ref()
        .map(|c| LogConfig::from(&c.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Config(args) => config::execute(args, cli.config.as_deref(), cli.json),
        Commands::Tag(args) => tag::execute(args, cli.json),
        Commands::Merge(args) => loaded.and_then(|config| merge::execute(args, &config, cli.json)),
        Commands::Jobs(args) => match loaded {
            Ok(config) => jobs::execute(args, &config, cli.json).await,
            Err(err) => Err(err),
        },
    };

    if let Err(err) = result {
        greenlight::cli::handle_error(err, cli.json);
    }
}
