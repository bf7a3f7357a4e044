//! scanner-indexer CLI
//!
//! Entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use scanner_indexer::cli::{Cli, Commands};
use scanner_indexer::config::ConfigManager;
use scanner_indexer::error::IndexerResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> IndexerResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("scanner_indexer=warn"),
        1 => EnvFilter::new("scanner_indexer=info"),
        _ => EnvFilter::new("scanner_indexer=debug"),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    match cli.command {
        Commands::Fetch(args) => scanner_indexer::cli::commands::fetch(args, &config).await,
        Commands::Gc(args) => scanner_indexer::cli::commands::gc(args, &config).await,
        Commands::Config(args) => {
            scanner_indexer::cli::commands::config(args, &config_manager, &config).await
        }
    }
}
