//! Configuration schema for the indexer
//!
//! Configuration is stored at `~/.config/scanner-indexer/config.toml`

use crate::manifest::manager::DEFAULT_GC_INTERVAL;
use crate::manifest::{ExpiryWindow, GcOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Layer arena settings
    pub arena: ArenaConfig,

    /// Manifest garbage collection
    pub gc: GcConfig,

    /// Manifest expiry
    pub manifest: ManifestConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Layer arena configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Directory holding fetched layers; a temp directory when unset
    pub root: Option<PathBuf>,
}

impl ArenaConfig {
    /// Arena root, falling back to `<tmp>/scanner-fetcharena`
    pub fn root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("scanner-fetcharena"))
    }
}

/// Manifest garbage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Run the periodic GC loop
    pub enabled: bool,

    /// Seconds between GC passes (minimum one hour)
    pub interval_secs: u64,

    /// Maximum manifests deleted per pass
    pub batch_size: Option<usize>,

    /// Backfill metadata for legacy manifests at startup
    pub migrate_on_start: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_GC_INTERVAL.as_secs(),
            batch_size: None,
            migrate_on_start: true,
        }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn options(&self) -> GcOptions {
        GcOptions {
            limit: self.batch_size,
        }
    }
}

/// Manifest expiry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Earliest expiry after indexing, in seconds (minimum one hour)
    pub delete_interval_start_secs: u64,

    /// Width of the random expiry range, in seconds (minimum one hour)
    pub delete_interval_duration_secs: u64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        let window = ExpiryWindow::default();
        Self {
            delete_interval_start_secs: window.start().as_secs(),
            delete_interval_duration_secs: window.duration().as_secs(),
        }
    }
}

impl ManifestConfig {
    pub fn expiry_window(&self) -> ExpiryWindow {
        ExpiryWindow::new(
            Duration::from_secs(self.delete_interval_start_secs),
            Duration::from_secs(self.delete_interval_duration_secs),
        )
    }
}
