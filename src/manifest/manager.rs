//! Manifest lifecycle manager
//!
//! Migration and garbage collection each run under a named lock taken with
//! `try_lock`. When another replica holds the lock the work is skipped, not
//! retried; the next GC tick is the retry.

use crate::error::IndexerResult;
use crate::lock::{Locker, GC_LOCK, MIGRATE_LOCK};
use crate::manifest::store::{GcOptions, ManifestContentStore, ManifestMetadataStore};
use crate::manifest::ExpiryWindow;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest accepted GC interval
pub const MIN_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Interval used when none is configured
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Lifecycle of a [`ManifestManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Idle,
    Collecting,
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Idle => "idle",
            Self::Collecting => "collecting",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Migrates legacy manifests and garbage-collects expired ones
pub struct ManifestManager {
    store: Arc<dyn ManifestMetadataStore>,
    content: Option<Arc<dyn ManifestContentStore>>,
    locker: Arc<dyn Locker>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    gc_interval: Duration,
    gc_options: GcOptions,
    window: ExpiryWindow,
    shutdown: CancellationToken,
    state: Mutex<ManagerState>,
}

impl ManifestManager {
    pub fn new(store: Arc<dyn ManifestMetadataStore>, locker: Arc<dyn Locker>) -> Self {
        Self {
            store,
            content: None,
            locker,
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
            gc_interval: DEFAULT_GC_INTERVAL,
            gc_options: GcOptions::default(),
            window: ExpiryWindow::default(),
            shutdown: CancellationToken::new(),
            state: Mutex::new(ManagerState::Created),
        }
    }

    /// Also delete manifest content after its metadata is collected
    pub fn with_content_store(mut self, content: Arc<dyn ManifestContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    /// Set the GC interval, raised to [`MIN_GC_INTERVAL`] if smaller
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_GC_INTERVAL {
            warn!(
                configured = ?interval,
                minimum = ?MIN_GC_INTERVAL,
                "manifest GC interval too small, using minimum"
            );
            self.gc_interval = MIN_GC_INTERVAL;
        } else {
            self.gc_interval = interval;
        }
        self
    }

    pub fn with_gc_options(mut self, options: GcOptions) -> Self {
        self.gc_options = options;
        self
    }

    pub fn with_expiry_window(mut self, window: ExpiryWindow) -> Self {
        self.window = window;
        self
    }

    /// Source of expiry jitter for migrated manifests
    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn gc_interval(&self) -> Duration {
        self.gc_interval
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    fn set_state(&self, next: ManagerState) {
        let mut state = self.state.lock();
        if *state != ManagerState::Stopped {
            *state = next;
        }
    }

    /// Give every stored manifest without metadata an expiration.
    ///
    /// Returns the migrated IDs; empty when another replica holds the
    /// migration lock.
    pub async fn migrate_manifests(&self) -> IndexerResult<Vec<String>> {
        let lease = self.locker.try_lock(&self.shutdown, MIGRATE_LOCK);
        if !lease.is_acquired() {
            debug!("skipping manifest migration: lock held elsewhere");
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let window = self.window;
        let mut expiry = || {
            let mut rng = self.rng.lock();
            window.random_expiry(now, &mut **rng)
        };
        let migrated = self.store.migrate_manifests(&mut expiry).await?;
        drop(lease);

        info!(count = migrated.len(), "migrated manifests to metadata store");
        self.set_state(ManagerState::Idle);
        Ok(migrated)
    }

    /// Run GC now and then once per interval until [`stop`](Self::stop).
    ///
    /// The timer is reset after each pass, so passes never overlap. Errors
    /// from a pass are logged and the loop continues.
    pub async fn start_gc(&self) -> IndexerResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.set_state(ManagerState::Idle);
        info!(interval = ?self.gc_interval, "starting manifest GC");

        loop {
            if let Err(e) = self.run_gc().await {
                error!(error = %e, retryable = e.is_retryable(), "manifest GC failed");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.gc_interval) => {}
            }
        }

        info!("manifest GC stopped");
        Ok(())
    }

    /// One GC pass: delete metadata expired as of now, then its content.
    ///
    /// Returns the deleted IDs; empty when another pass holds the GC lock.
    /// Content deletion is best effort: a failure is logged and the
    /// metadata deletion stands.
    pub async fn run_gc(&self) -> IndexerResult<Vec<String>> {
        let lease = self.locker.try_lock(&self.shutdown, GC_LOCK);
        if !lease.is_acquired() {
            debug!("skipping manifest GC: another run is in progress");
            return Ok(Vec::new());
        }

        self.set_state(ManagerState::Collecting);
        let result = self.collect().await;
        self.set_state(ManagerState::Idle);
        drop(lease);
        result
    }

    async fn collect(&self) -> IndexerResult<Vec<String>> {
        let deleted = self
            .store
            .gc_manifests(Utc::now(), &self.gc_options)
            .await?;
        if deleted.is_empty() {
            debug!("no expired manifests");
            return Ok(deleted);
        }
        info!(count = deleted.len(), "deleted expired manifest metadata");

        let Some(content) = &self.content else {
            return Ok(deleted);
        };
        match content.delete_manifests(&deleted).await {
            Ok(removed) if removed.len() < deleted.len() => debug!(
                removed = removed.len(),
                missing = deleted.len() - removed.len(),
                "some expired manifests had no content"
            ),
            Ok(removed) => debug!(removed = removed.len(), "deleted expired manifest content"),
            Err(e) => warn!(
                error = %e,
                count = deleted.len(),
                "failed to delete expired manifest content; it stays until removed by hand"
            ),
        }
        Ok(deleted)
    }

    /// Stop the GC loop; later calls do nothing
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state == ManagerState::Stopped {
            return;
        }
        *state = ManagerState::Stopped;
        self.shutdown.cancel();
        info!("manifest manager stopped");
    }
}
