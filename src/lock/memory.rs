//! Single-process lock source

use crate::error::{IndexerError, IndexerResult};
use crate::lock::{Lease, Locker};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct Held {
    names: Mutex<HashSet<String>>,
    released: Notify,
}

/// Locks held in this process only
#[derive(Clone, Default)]
pub struct MemoryLocker {
    held: Arc<Held>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held
    pub fn is_held(&self, name: &str) -> bool {
        self.held.names.lock().contains(name)
    }

    fn acquire(&self, parent: &CancellationToken, name: &str) -> Option<Lease> {
        if parent.is_cancelled() || !self.held.names.lock().insert(name.to_string()) {
            return None;
        }
        debug!(lock = name, "lock acquired");

        let held = Arc::clone(&self.held);
        let owned = name.to_string();
        Some(Lease::acquired(name, parent, move || {
            held.names.lock().remove(&owned);
            held.released.notify_waiters();
            debug!(lock = %owned, "lock released");
        }))
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    fn try_lock(&self, parent: &CancellationToken, name: &str) -> Lease {
        self.acquire(parent, name)
            .unwrap_or_else(|| Lease::not_acquired(name, parent))
    }

    async fn lock(&self, parent: &CancellationToken, name: &str) -> IndexerResult<Lease> {
        loop {
            // Register before checking so a release in between is not missed.
            let released = self.held.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(lease) = self.acquire(parent, name) {
                return Ok(lease);
            }
            tokio::select! {
                _ = parent.cancelled() => return Err(IndexerError::Cancelled),
                _ = &mut released => {}
            }
        }
    }
}
