//! Indexer facade
//!
//! Ties the pieces together for one image: resolve through the arena,
//! realize the layers, hand them to a [`LayerScanner`], release the layers,
//! and record the manifest's metadata with a randomized expiry.

use crate::digest::{Algorithm, LayerDigest};
use crate::error::{IndexerError, IndexerResult};
use crate::fetch::{FetchArena, RealizedLayer};
use crate::manifest::{ExpiryWindow, ManifestManager, ManifestMetadataStore};
use crate::registry::{ImageReference, ResolveOptions};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Turns realized layers into an index report
#[async_trait]
pub trait LayerScanner: Send + Sync {
    type Report: Send;

    /// Scan the layers of the manifest identified by `manifest_id`, in order
    async fn scan(
        &self,
        manifest_id: &LayerDigest,
        layers: &[RealizedLayer],
    ) -> IndexerResult<Self::Report>;
}

/// Manifest ID for an image hash ID: the SHA-512 of the hash ID
pub fn manifest_digest(hash_id: &str) -> LayerDigest {
    LayerDigest::of(Algorithm::Sha512, hash_id.as_bytes())
}

pub struct Indexer<S: LayerScanner> {
    arena: FetchArena,
    store: Arc<dyn ManifestMetadataStore>,
    scanner: S,
    manager: Option<Arc<ManifestManager>>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
    window: ExpiryWindow,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl<S: LayerScanner> Indexer<S> {
    pub fn new(arena: FetchArena, store: Arc<dyn ManifestMetadataStore>, scanner: S) -> Self {
        Self {
            arena,
            store,
            scanner,
            manager: None,
            gc_task: Mutex::new(None),
            window: ExpiryWindow::default(),
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
        }
    }

    /// Run manifest migration and GC alongside indexing
    pub fn with_manager(mut self, manager: Arc<ManifestManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_expiry_window(mut self, window: ExpiryWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn arena(&self) -> &FetchArena {
        &self.arena
    }

    /// Migrate legacy manifests (if asked) and start the GC loop in the background
    pub async fn start(&self, migrate: bool) -> IndexerResult<()> {
        let Some(manager) = &self.manager else {
            return Ok(());
        };
        if migrate {
            manager.migrate_manifests().await?;
        }

        let manager = Arc::clone(manager);
        let handle = tokio::spawn(async move {
            if let Err(e) = manager.start_gc().await {
                error!(error = %e, "manifest GC failed");
            }
        });
        if let Some(previous) = self.gc_task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Index the image at `image_url` (`http://` or `https://`) under `hash_id`
    pub async fn index_container_image(
        &self,
        hash_id: &str,
        image_url: &str,
        opts: &ResolveOptions,
    ) -> IndexerResult<S::Report> {
        let manifest_id = manifest_digest(hash_id);
        let reference = ImageReference::parse_url(image_url)?;
        let mut opts = opts.clone();
        opts.insecure_skip_tls_verify |= reference.is_insecure();

        let manifest = self.arena.get(&reference, &opts).await?;
        info!(
            image = %reference,
            manifest_id = %manifest_id,
            layers = manifest.layers.len(),
            "indexing container image"
        );

        let mut realizer = self.arena.realizer();
        let scanned = match realizer.realize(&manifest.layers).await {
            Ok(layers) => self.scanner.scan(&manifest_id, &layers).await,
            Err(e) => Err(e),
        };
        let report = match (scanned, realizer.close()) {
            (Ok(report), Ok(())) => report,
            (Err(e), Ok(())) | (Ok(_), Err(e)) => return Err(e),
            (Err(scan), Err(close)) => return Err(IndexerError::Cleanup(vec![scan, close])),
        };

        let expiration = {
            let mut rng = self.rng.lock();
            self.window.random_expiry(Utc::now(), &mut **rng)
        };
        self.store
            .store_manifest(&manifest_id.to_string(), expiration)
            .await?;
        info!(manifest_id = %manifest_id, %expiration, "indexed container image");
        Ok(report)
    }

    /// Whether `hash_id` has been indexed and not yet expired
    pub async fn manifest_indexed(&self, hash_id: &str) -> IndexerResult<bool> {
        self.store
            .manifest_exists(&manifest_digest(hash_id).to_string())
            .await
    }

    /// Stop GC and remove every arena file
    pub async fn close(&self) -> IndexerResult<()> {
        let mut errors = Vec::new();
        if let Some(manager) = &self.manager {
            manager.stop();
        }
        let task = self.gc_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                errors.push(IndexerError::Task(e.to_string()));
            }
        }
        if let Err(e) = self.arena.close().await {
            errors.push(e);
        }
        IndexerError::join(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MemoryRegistry;
    use crate::lock::MemoryLocker;
    use crate::manifest::{ManagerState, MemoryManifestStore};
    use crate::registry::media_types;
    use tempfile::TempDir;

    /// Reports each layer's digest and content
    struct ReadingScanner;

    #[async_trait]
    impl LayerScanner for ReadingScanner {
        type Report = Vec<(LayerDigest, Vec<u8>)>;

        async fn scan(
            &self,
            _manifest_id: &LayerDigest,
            layers: &[RealizedLayer],
        ) -> IndexerResult<Self::Report> {
            let mut report = Vec::new();
            for layer in layers {
                let content = tokio::fs::read(&layer.path)
                    .await
                    .map_err(|e| IndexerError::io("reading realized layer", e))?;
                report.push((layer.digest.clone(), content));
            }
            Ok(report)
        }
    }

    struct RejectingScanner;

    #[async_trait]
    impl LayerScanner for RejectingScanner {
        type Report = ();

        async fn scan(&self, manifest_id: &LayerDigest, _: &[RealizedLayer]) -> IndexerResult<()> {
            Err(IndexerError::Scan {
                manifest: manifest_id.to_string(),
                reason: "unsupported package database".to_string(),
            })
        }
    }

    async fn fixture() -> (TempDir, Arc<MemoryRegistry>, FetchArena, Arc<MemoryManifestStore>) {
        let dir = TempDir::new().unwrap();
        let registry = MemoryRegistry::new();
        let base = registry.add_layer(b"base", media_types::OCI_LAYER);
        let app = registry.add_layer(b"app", media_types::OCI_LAYER);
        registry.add_image("registry.example.com/team/app:1.0", &[base, app]);
        let arena = FetchArena::new(dir.path(), registry.clone()).await.unwrap();
        (dir, registry, arena, Arc::new(MemoryManifestStore::new()))
    }

    #[test]
    fn manifest_digest_is_sha512_of_hash_id() {
        let a = manifest_digest("/v4/containerimage/abc");
        assert_eq!(a.algorithm(), Algorithm::Sha512);
        assert_eq!(a.hex().len(), 128);
        assert_eq!(a, manifest_digest("/v4/containerimage/abc"));
        assert_ne!(a, manifest_digest("/v4/containerimage/abd"));
    }

    #[tokio::test]
    async fn index_scans_layers_and_records_metadata() {
        let (_dir, _registry, arena, store) = fixture().await;
        let indexer = Indexer::new(arena, store.clone(), ReadingScanner)
            .with_rng(Box::new(StdRng::seed_from_u64(3)));
        assert!(!indexer.manifest_indexed("hash").await.unwrap());

        let report = indexer
            .index_container_image(
                "hash",
                "https://registry.example.com/team/app:1.0",
                &ResolveOptions::default(),
            )
            .await
            .unwrap();

        let contents: Vec<_> = report.into_iter().map(|(_, c)| c).collect();
        assert_eq!(contents, vec![b"base".to_vec(), b"app".to_vec()]);
        assert!(indexer.manifest_indexed("hash").await.unwrap());

        let expiration = store
            .expiration(&manifest_digest("hash").to_string())
            .unwrap();
        assert!(expiration > Utc::now() + chrono::Duration::days(6));
        assert!(expiration < Utc::now() + chrono::Duration::days(31));
        assert!(indexer.arena().tracked_layers().is_empty());
    }

    #[tokio::test]
    async fn url_without_scheme_is_rejected() {
        let (_dir, _registry, arena, store) = fixture().await;
        let indexer = Indexer::new(arena, store, ReadingScanner);

        let err = indexer
            .index_container_image(
                "hash",
                "registry.example.com/team/app:1.0",
                &ResolveOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn scan_failure_releases_layers_and_stores_nothing() {
        let (_dir, _registry, arena, store) = fixture().await;
        let indexer = Indexer::new(arena, store.clone(), RejectingScanner);

        let err = indexer
            .index_container_image(
                "hash",
                "http://registry.example.com/team/app:1.0",
                &ResolveOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, IndexerError::Scan { .. }));
        assert_eq!(store.metadata_len(), 0);
        assert!(indexer.arena().tracked_layers().is_empty());
    }

    #[tokio::test]
    async fn start_and_close_drive_the_manager() {
        let (_dir, _registry, arena, store) = fixture().await;
        store.add_content("legacy");
        let manager = Arc::new(ManifestManager::new(store.clone(), Arc::new(MemoryLocker::new())));
        let indexer =
            Indexer::new(arena, store.clone(), ReadingScanner).with_manager(manager.clone());

        indexer.start(true).await.unwrap();
        assert!(store.expiration("legacy").is_some());

        indexer.close().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);
    }
}
