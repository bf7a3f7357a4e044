//! Fetch arena: shared, ref-counted layer files on local disk
//!
//! Every unique layer is downloaded at most once while it is in use, no
//! matter how many image index operations want it at the same time. Each
//! [`Realizer`] claim bumps the layer's refcount; the file is deleted when
//! the last claim is released.
//!
//! Invariant: the file at [`FetchArena::layer_path`] exists iff the layer's
//! refcount is above zero. Every transition of a refcount between zero and
//! one happens together with the matching rename or delete, under the
//! arena mutex.
//!
//! Closing the arena starts a new generation. Claims taken before the close
//! are stale afterwards and releasing them is a no-op, so a realizer that
//! outlives the close can never drop a reference somebody else took.

use crate::digest::LayerDigest;
use crate::error::{IndexerError, IndexerResult};
use crate::fetch::download::{fetch_layer, TEMP_PREFIX};
use crate::fetch::flight::Flights;
use crate::fetch::realizer::Realizer;
use crate::registry::{ImageReference, Manifest, RegistryClient, RemoteLayer, ResolveOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Outcome of a shared download: the temp file holding the layer
type FetchResult = Result<PathBuf, Arc<IndexerError>>;

/// One reference on a layer, tagged with the arena generation it was taken in
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Claim {
    pub(crate) digest: LayerDigest,
    generation: u64,
}

struct ArenaState {
    generation: u64,
    refcounts: HashMap<LayerDigest, usize>,
    remotes: HashMap<LayerDigest, RemoteLayer>,
    flights: Flights<LayerDigest, FetchResult>,
}

pub(crate) struct ArenaInner {
    root: PathBuf,
    registry: Arc<dyn RegistryClient>,
    state: Mutex<ArenaState>,
}

/// Process-local pool of downloaded layer files
#[derive(Clone)]
pub struct FetchArena {
    inner: Arc<ArenaInner>,
}

impl FetchArena {
    /// Create an arena rooted at `root`, creating the directory if needed.
    ///
    /// Files left in `root` by a previous process are removed: nothing
    /// holds a claim on them.
    pub async fn new(
        root: impl Into<PathBuf>,
        registry: Arc<dyn RegistryClient>,
    ) -> IndexerResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| IndexerError::io(format!("creating arena root {}", root.display()), e))?;

        let removed = sweep_root(&root, |_| true).await?;
        if removed > 0 {
            info!(root = %root.display(), removed, "removed leftover layer files");
        }

        Ok(Self {
            inner: Arc::new(ArenaInner {
                root,
                registry,
                state: Mutex::new(ArenaState {
                    generation: 0,
                    refcounts: HashMap::new(),
                    remotes: HashMap::new(),
                    flights: Flights::new(),
                }),
            }),
        })
    }

    /// Resolve an image's manifest and remember how to download its layers.
    ///
    /// Nothing is downloaded here.
    pub async fn get(
        &self,
        reference: &ImageReference,
        opts: &ResolveOptions,
    ) -> IndexerResult<Manifest> {
        let resolved = self.inner.registry.resolve(reference, opts).await?;

        let mut state = self.inner.state.lock();
        let mut registered = 0;
        for layer in resolved.layers {
            if !state.remotes.contains_key(&layer.digest) {
                state.remotes.insert(layer.digest.clone(), layer);
                registered += 1;
            }
        }
        drop(state);

        debug!(
            reference = %reference,
            manifest = %resolved.manifest.digest,
            layers = resolved.manifest.layers.len(),
            registered,
            "resolved image"
        );
        Ok(resolved.manifest)
    }

    /// A fresh handle for claiming layers
    pub fn realizer(&self) -> Realizer {
        Realizer::new(Arc::clone(&self.inner))
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Final on-disk path for a layer
    pub fn layer_path(&self, digest: &LayerDigest) -> PathBuf {
        self.inner.layer_path(digest)
    }

    /// Number of live claims on a layer
    pub fn refcount(&self, digest: &LayerDigest) -> usize {
        self.inner
            .state
            .lock()
            .refcounts
            .get(digest)
            .copied()
            .unwrap_or(0)
    }

    /// Layers currently on disk
    pub fn tracked_layers(&self) -> Vec<LayerDigest> {
        let mut layers: Vec<_> = self.inner.state.lock().refcounts.keys().cloned().collect();
        layers.sort();
        layers
    }

    /// Remove every layer file regardless of outstanding claims.
    ///
    /// Meant for process shutdown. Outstanding claims mean a realizer was
    /// never closed; they are logged and dropped.
    pub async fn close(&self) -> IndexerResult<()> {
        let mut errors = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if !state.refcounts.is_empty() {
                let claims: usize = state.refcounts.values().sum();
                warn!(
                    layers = state.refcounts.len(),
                    claims,
                    "closing arena with claimed layers; a realizer was not closed"
                );
            }
            for digest in state.refcounts.keys() {
                if let Err(e) = remove_if_exists(&self.inner.layer_path(digest)) {
                    errors.push(IndexerError::io(format!("removing layer {digest}"), e));
                }
            }
            state.refcounts.clear();
            state.flights.clear();
            state.remotes.clear();
            state.generation += 1;
        }

        // Downloads still running hold their own temp files; this catches the rest.
        if let Err(e) = sweep_root(&self.inner.root, |name| name.starts_with(TEMP_PREFIX)).await {
            errors.push(e);
        }

        debug!(root = %self.inner.root.display(), "arena closed");
        IndexerError::join(errors)
    }
}

impl ArenaInner {
    fn layer_path(&self, digest: &LayerDigest) -> PathBuf {
        self.root.join(digest.file_name())
    }

    /// Claim one layer: download it if nobody has, then take a reference.
    ///
    /// The claim is appended to `claims` under the arena mutex, in the same
    /// critical section as the refcount increment.
    pub(crate) async fn claim(
        self: Arc<Self>,
        digest: LayerDigest,
        claims: Arc<Mutex<Vec<Claim>>>,
    ) -> IndexerResult<PathBuf> {
        let final_path = self.layer_path(&digest);

        let flight = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(count) = state.refcounts.get_mut(&digest) {
                *count += 1;
                claims.lock().push(Claim {
                    digest: digest.clone(),
                    generation: state.generation,
                });
                debug!(digest = %digest, refcount = *count, "claimed cached layer");
                return Ok(final_path);
            }

            let remote = state
                .remotes
                .get(&digest)
                .cloned()
                .ok_or_else(|| IndexerError::LayerNotRegistered(digest.to_string()))?;
            let registry = Arc::clone(&self.registry);
            let root = self.root.clone();
            let (flight, started) = state.flights.join(digest.clone(), move || async move {
                fetch_layer(registry, remote, root).await.map_err(Arc::new)
            });
            if started {
                debug!(digest = %digest, "starting layer download");
            }
            flight
        };

        let result = flight.clone().await;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let temp_path = match result {
            Ok(path) => path,
            Err(source) => {
                state.flights.forget_if_same(&digest, &flight);
                return Err(IndexerError::Download {
                    digest: digest.to_string(),
                    source,
                });
            }
        };

        // Another waiter on the same download already moved the file into place.
        if let Some(count) = state.refcounts.get_mut(&digest) {
            *count += 1;
            claims.lock().push(Claim {
                digest: digest.clone(),
                generation: state.generation,
            });
            debug!(digest = %digest, refcount = *count, "claimed shared layer");
            return Ok(final_path);
        }

        // The layer may have been fully released and removed since the download finished.
        if !temp_path.exists() {
            state.flights.forget_if_same(&digest, &flight);
            return Err(IndexerError::LayerVanished {
                digest: digest.to_string(),
                path: temp_path,
            });
        }

        if let Err(e) = std::fs::rename(&temp_path, &final_path) {
            state.flights.forget_if_same(&digest, &flight);
            return Err(IndexerError::io(
                format!("moving layer {digest} into {}", final_path.display()),
                e,
            ));
        }
        state.refcounts.insert(digest.clone(), 1);
        claims.lock().push(Claim {
            digest: digest.clone(),
            generation: state.generation,
        });
        debug!(digest = %digest, path = %final_path.display(), "layer fetched");
        Ok(final_path)
    }

    /// Drop one reference per claim, deleting files that reach zero.
    ///
    /// Every claim is processed; failures are collected, not short-circuited.
    pub(crate) fn release(&self, claims: &[Claim]) -> Vec<IndexerError> {
        let mut errors = Vec::new();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for claim in claims {
            let digest = &claim.digest;
            if claim.generation != state.generation {
                // The arena was closed underneath this claim.
                debug!(digest = %digest, "release of stale claim ignored");
                continue;
            }
            let Some(count) = state.refcounts.get_mut(digest) else {
                warn!(digest = %digest, "release of untracked layer ignored");
                continue;
            };
            *count -= 1;
            if *count > 0 {
                debug!(digest = %digest, refcount = *count, "released layer");
                continue;
            }

            state.refcounts.remove(digest);
            state.flights.forget(digest);
            let path = self.layer_path(digest);
            match remove_if_exists(&path) {
                Ok(()) => debug!(digest = %digest, "removed unclaimed layer"),
                Err(e) => {
                    warn!(digest = %digest, error = %e, "failed to remove unclaimed layer");
                    errors.push(IndexerError::io(format!("removing layer {digest}"), e));
                }
            }
        }
        errors
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove files in `root` whose name passes `filter`; returns how many were removed
async fn sweep_root(root: &Path, filter: impl Fn(&str) -> bool) -> IndexerResult<usize> {
    let mut entries = fs::read_dir(root)
        .await
        .map_err(|e| IndexerError::io(format!("reading arena root {}", root.display()), e))?;

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IndexerError::io("reading arena entry", e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let is_layer_file = name.starts_with(TEMP_PREFIX)
            || name.starts_with("sha256-")
            || name.starts_with("sha512-");
        if !is_layer_file || !filter(name) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(IndexerError::io(
                    format!("removing {}", entry.path().display()),
                    e,
                ))
            }
        }
    }
    Ok(removed)
}
