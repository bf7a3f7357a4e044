//! Per-operation layer claims
//!
//! A [`Realizer`] belongs to one index operation. It claims layers from the
//! arena, hands back their on-disk paths, and releases exactly the claims it
//! took when closed.

use crate::digest::LayerDigest;
use crate::error::{IndexerError, IndexerResult};
use crate::fetch::arena::{ArenaInner, Claim};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// A layer available on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizedLayer {
    pub digest: LayerDigest,
    pub path: PathBuf,
}

/// Claims arena layers for one operation
pub struct Realizer {
    arena: Arc<ArenaInner>,
    // Shared with in-flight claim tasks so an aborted realize never loses a claim.
    claimed: Arc<Mutex<Vec<Claim>>>,
}

impl Realizer {
    pub(crate) fn new(arena: Arc<ArenaInner>) -> Self {
        Self {
            arena,
            claimed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every layer available on disk, returning paths in input order.
    ///
    /// Layers are fetched concurrently. The first failure aborts the rest and
    /// is returned; claims that completed before the abort stay recorded and
    /// are released by [`Realizer::close`].
    pub async fn realize(&mut self, layers: &[LayerDigest]) -> IndexerResult<Vec<RealizedLayer>> {
        let mut tasks = JoinSet::new();
        for (idx, digest) in layers.iter().cloned().enumerate() {
            let arena = Arc::clone(&self.arena);
            let claims = Arc::clone(&self.claimed);
            tasks.spawn(async move { (idx, arena.claim(digest, claims).await) });
        }

        let mut paths: Vec<Option<PathBuf>> = vec![None; layers.len()];
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(path))) => paths[idx] = Some(path),
                Ok((idx, Err(e))) => {
                    if failure.is_none() {
                        warn!(digest = %layers[idx], error = %e, "failed to realize layer");
                        failure = Some(e);
                        tasks.abort_all();
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(IndexerError::Task(e.to_string()));
                        tasks.abort_all();
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        debug!(layers = layers.len(), "realized layers");
        Ok(layers
            .iter()
            .zip(paths)
            .filter_map(|(digest, path)| {
                path.map(|path| RealizedLayer {
                    digest: digest.clone(),
                    path,
                })
            })
            .collect())
    }

    /// Digests this realizer currently holds, one entry per claim
    pub fn claimed(&self) -> Vec<LayerDigest> {
        self.claimed.lock().iter().map(|c| c.digest.clone()).collect()
    }

    /// Release every claim taken by this realizer.
    ///
    /// Each claim is released exactly once even when some file deletions
    /// fail; the failures are joined into the returned error.
    pub fn close(self) -> IndexerResult<()> {
        let claims = std::mem::take(&mut *self.claimed.lock());
        IndexerError::join(self.arena.release(&claims))
    }
}

impl Drop for Realizer {
    fn drop(&mut self) {
        let claims = std::mem::take(&mut *self.claimed.lock());
        if claims.is_empty() {
            return;
        }
        warn!(claims = claims.len(), "realizer dropped without close; releasing claims");
        for e in self.arena.release(&claims) {
            warn!(error = %e, "failed to release layer");
        }
    }
}
