//! Error types for the indexer
//!
//! All modules use `IndexerResult<T>` as their return type.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for indexer operations
pub type IndexerResult<T> = Result<T, IndexerError>;

/// All errors that can occur in the indexer
#[derive(Error, Debug)]
pub enum IndexerError {
    // Input errors
    #[error("Invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Invalid digest {digest:?}: {reason}")]
    InvalidDigest { digest: String, reason: String },

    // Registry errors
    #[error("Registry error for {reference}: {reason}")]
    Registry { reference: String, reason: String },

    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Unsupported layer media type: {0}")]
    UnsupportedMediaType(String),

    // Arena errors
    #[error("Layer {0} was never registered with the arena; resolve its image first")]
    LayerNotRegistered(String),

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Fetched layer {digest} disappeared before it could be claimed: {path}")]
    LayerVanished { digest: String, path: PathBuf },

    #[error("Downloading layer {digest}: {source}")]
    Download {
        digest: String,
        #[source]
        source: Arc<IndexerError>,
    },

    #[error("Layer task failed: {0}")]
    Task(String),

    // Coordination errors
    #[error("Operation cancelled")]
    Cancelled,

    // Store errors
    #[error("Manifest store error: {0}")]
    Store(String),

    #[error("Scanning manifest {manifest}: {reason}")]
    Scan { manifest: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", join_errors(.0))]
    Cleanup(Vec<IndexerError>),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_errors(errors: &[IndexerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl IndexerError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a registry error for a reference
    pub fn registry(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registry {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid digest error
    pub fn invalid_digest(digest: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDigest {
            digest: digest.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Collapse a list of errors: none is success, one is returned as is.
    pub fn join(mut errors: Vec<IndexerError>) -> IndexerResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Cleanup(errors)),
        }
    }

    /// Check if error is transient and worth retrying on the next attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Registry { .. } | Self::Store(_) | Self::Task(_) => true,
            Self::Download { source, .. } => source.is_retryable(),
            Self::Cleanup(errors) => errors.iter().any(Self::is_retryable),
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidReference { .. } => {
                Some("References look like registry/repository:tag or repository@sha256:<hex>")
            }
            Self::LayerNotRegistered(_) => Some("Call get() for the image before realizing layers"),
            Self::ConfigInvalid { .. } => Some("Run: scanner-indexer config init --force"),
            _ => None,
        }
    }
}
