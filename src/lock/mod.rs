//! Named advisory locks
//!
//! Lock contention is not an error. [`Locker::try_lock`] always returns a
//! [`Lease`]; when the lock is held elsewhere the lease's token is already
//! cancelled and the caller is expected to skip its work.
//!
//! Lock names used by the manifest manager:
//! - `manifest-migrate`
//! - `manifest-garbage-collection`

pub mod memory;

pub use memory::MemoryLocker;

use crate::error::IndexerResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Lock guarding manifest metadata migration
pub const MIGRATE_LOCK: &str = "manifest-migrate";

/// Lock guarding a garbage collection pass
pub const GC_LOCK: &str = "manifest-garbage-collection";

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Proof of holding a named lock, released on drop.
///
/// The lease token is a child of the caller's token: it is cancelled when the
/// lock was not acquired, when the parent is cancelled, and when the lease is
/// released.
pub struct Lease {
    name: String,
    token: CancellationToken,
    release: Option<ReleaseFn>,
}

impl Lease {
    /// A held lease; `release` runs exactly once when the lease ends
    pub fn acquired(
        name: impl Into<String>,
        parent: &CancellationToken,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            token: parent.child_token(),
            release: Some(Box::new(release)),
        }
    }

    /// A lease for a lock someone else holds
    pub fn not_acquired(name: impl Into<String>, parent: &CancellationToken) -> Self {
        let token = parent.child_token();
        token.cancel();
        Self {
            name: name.into(),
            token,
            release: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the lock is held and the holder has not been cancelled
    pub fn is_acquired(&self) -> bool {
        self.release.is_some() && !self.token.is_cancelled()
    }

    /// Token to run the guarded work under
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Release the lock now instead of at drop
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        self.token.cancel();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("name", &self.name)
            .field("acquired", &self.is_acquired())
            .finish()
    }
}

/// Source of named locks, possibly shared across processes
#[async_trait]
pub trait Locker: Send + Sync {
    /// Take the lock if it is free; never waits
    fn try_lock(&self, parent: &CancellationToken, name: &str) -> Lease;

    /// Wait until the lock is taken or `parent` is cancelled
    async fn lock(&self, parent: &CancellationToken, name: &str) -> IndexerResult<Lease>;
}
