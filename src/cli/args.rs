//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// scanner-indexer - container image layer indexer
///
/// Fetches image layers into a shared, reference-counted arena and manages
/// the lifecycle of indexed manifests.
#[derive(Parser, Debug)]
#[command(name = "scanner-indexer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SCANNER_INDEXER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch an image's layers from an OCI layout into the arena
    Fetch(FetchArgs),

    /// Migrate and garbage-collect manifests in a store snapshot
    Gc(GcArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Image reference (repository[:tag] or repository@sha256:<hex>)
    pub reference: String,

    /// Directory holding one OCI image layout per repository
    #[arg(short, long, env = "SCANNER_INDEXER_LAYOUT")]
    pub layout: PathBuf,

    /// Platform to select from multi-arch images (os/arch)
    #[arg(long, default_value = "linux/amd64")]
    pub platform: String,

    /// Arena directory (defaults to the configured arena root)
    #[arg(long)]
    pub arena: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the gc command
#[derive(Parser, Debug)]
pub struct GcArgs {
    /// Manifest store snapshot (JSON); created if missing
    #[arg(short, long, env = "SCANNER_INDEXER_STORE")]
    pub store: PathBuf,

    /// Run one GC pass and exit instead of looping until Ctrl-C
    #[arg(long)]
    pub once: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., gc.interval_secs)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for fetch results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one path per line)
    Plain,
}
