//! In-memory registry for tests

use crate::digest::{Algorithm, LayerDigest};
use crate::error::{IndexerError, IndexerResult};
use crate::registry::{
    ImageReference, LayerStream, Manifest, RegistryClient, RemoteLayer, ResolveOptions,
    ResolvedImage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Registry serving blobs from memory, counting downloads per digest
#[derive(Default)]
pub struct MemoryRegistry {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    images: Mutex<HashMap<String, ResolvedImage>>,
    downloads: Mutex<HashMap<LayerDigest, usize>>,
    failing: Mutex<HashSet<LayerDigest>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a blob and return a handle whose digest is the blob's sha256
    pub fn add_layer(&self, content: &[u8], media_type: &str) -> RemoteLayer {
        let digest = LayerDigest::of(Algorithm::Sha256, content);
        self.blobs.lock().insert(digest.to_string(), content.to_vec());
        RemoteLayer {
            digest: digest.clone(),
            media_type: media_type.to_string(),
            size: content.len() as u64,
            source: digest.to_string(),
        }
    }

    /// Register an image under `reference` made of `layers`
    pub fn add_image(&self, reference: &str, layers: &[RemoteLayer]) -> Manifest {
        let joined: Vec<String> = layers.iter().map(|l| l.digest.to_string()).collect();
        let manifest = Manifest {
            digest: LayerDigest::of(Algorithm::Sha256, joined.join(",").as_bytes()),
            layers: layers.iter().map(|l| l.digest.clone()).collect(),
        };
        let key = ImageReference::parse(reference)
            .expect("valid test reference")
            .to_string();
        self.images.lock().insert(
            key,
            ResolvedImage {
                manifest: manifest.clone(),
                layers: layers.to_vec(),
            },
        );
        manifest
    }

    /// Make downloads of `digest` fail
    pub fn fail_downloads(&self, digest: &LayerDigest) {
        self.failing.lock().insert(digest.clone());
    }

    /// Block downloads until permits are added to the returned semaphore
    pub fn hold_downloads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Number of times `digest` was downloaded
    pub fn downloads(&self, digest: &LayerDigest) -> usize {
        self.downloads.lock().get(digest).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn resolve(
        &self,
        reference: &ImageReference,
        _opts: &ResolveOptions,
    ) -> IndexerResult<ResolvedImage> {
        self.images
            .lock()
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| IndexerError::ManifestNotFound(reference.to_string()))
    }

    async fn download(&self, layer: &RemoteLayer) -> IndexerResult<LayerStream> {
        *self.downloads.lock().entry(layer.digest.clone()).or_default() += 1;

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| IndexerError::Internal(e.to_string()))?;
        }

        if self.failing.lock().contains(&layer.digest) {
            return Err(IndexerError::io(
                format!("downloading {}", layer.digest),
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "injected failure"),
            ));
        }

        let content = self
            .blobs
            .lock()
            .get(&layer.source)
            .cloned()
            .ok_or_else(|| IndexerError::registry(&layer.source, "blob unknown"))?;
        Ok(Box::pin(std::io::Cursor::new(content)))
    }
}
