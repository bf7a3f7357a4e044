//! Registry client abstraction
//!
//! The arena never talks HTTP itself. A [`RegistryClient`] resolves a
//! reference to a manifest plus one [`RemoteLayer`] handle per layer, and
//! later opens a byte stream for a handle. Authentication and retry policy
//! belong to the implementation.

pub mod oci_layout;
pub mod reference;

pub use oci_layout::OciLayoutRegistry;
pub use reference::ImageReference;

use crate::digest::LayerDigest;
use crate::error::{IndexerError, IndexerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Well-known layer media types
pub mod media_types {
    pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
    pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    pub const OCI_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";
    pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
}

/// Byte stream of a (possibly compressed) layer blob
pub type LayerStream = Pin<Box<dyn AsyncRead + Send>>;

/// An image manifest: its own digest plus its ordered layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub digest: LayerDigest,
    pub layers: Vec<LayerDigest>,
}

/// Handle for downloading one layer later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayer {
    pub digest: LayerDigest,
    pub media_type: String,
    pub size: u64,
    /// Locator understood by the registry client that produced this handle
    pub source: String,
}

/// A resolved image: manifest plus download handles, in layer order
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub manifest: Manifest,
    pub layers: Vec<RemoteLayer>,
}

/// Target platform for multi-arch images
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

impl Platform {
    /// Parse `os/arch`
    pub fn parse(s: &str) -> IndexerResult<Self> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(Self {
                os: os.to_string(),
                architecture: arch.to_string(),
            }),
            _ => Err(IndexerError::User(format!(
                "invalid platform {s:?}, expected os/arch"
            ))),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Options for resolving an image
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub platform: Platform,
    pub insecure_skip_tls_verify: bool,
}

/// Resolves image references and streams layer blobs
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve a reference to its manifest and layer handles
    async fn resolve(
        &self,
        reference: &ImageReference,
        opts: &ResolveOptions,
    ) -> IndexerResult<ResolvedImage>;

    /// Open the blob behind a layer handle
    async fn download(&self, layer: &RemoteLayer) -> IndexerResult<LayerStream>;
}
