//! Manifest metadata lifecycle
//!
//! Every indexed manifest gets a metadata row with an expiration. The
//! [`ManifestManager`] backfills rows for manifests indexed before metadata
//! existed and periodically deletes expired ones.

pub mod manager;
pub mod memory;
pub mod store;

pub use manager::{ManagerState, ManifestManager};
pub use memory::MemoryManifestStore;
pub use store::{GcOptions, ManifestContentStore, ManifestMetadataStore};

use chrono::{DateTime, SubsecRound, Utc};
use rand::{Rng, RngCore};
use std::time::Duration;
use tracing::warn;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Smallest accepted window start and duration
pub const MIN_EXPIRY_PART: Duration = Duration::from_secs(60 * 60);

/// Largest accepted window start and duration
pub const MAX_EXPIRY_PART: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Range manifest expirations are drawn from: `[now + start, now + start + duration)`
///
/// Spreading expirations out keeps manifests indexed together from all
/// expiring in the same GC pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryWindow {
    start: Duration,
    duration: Duration,
}

impl ExpiryWindow {
    /// Build a window; each part is clamped to between one hour and ten years
    pub fn new(start: Duration, duration: Duration) -> Self {
        Self {
            start: clamp_part("start", start),
            duration: clamp_part("duration", duration),
        }
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Draw an expiration, truncated to whole seconds
    pub fn random_expiry<R>(&self, now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc>
    where
        R: RngCore + ?Sized,
    {
        let jitter = rng.gen_range(0..self.duration.as_secs());
        let offset = self.start.as_secs() + jitter;
        now.trunc_subsecs(0) + chrono::Duration::seconds(offset as i64)
    }
}

impl Default for ExpiryWindow {
    /// Uniform between 7 and 30 days from now
    fn default() -> Self {
        Self {
            start: 7 * DAY,
            duration: 23 * DAY,
        }
    }
}

fn clamp_part(part: &str, value: Duration) -> Duration {
    if value < MIN_EXPIRY_PART {
        warn!(
            part,
            configured = ?value,
            minimum = ?MIN_EXPIRY_PART,
            "manifest expiry window too small, using minimum"
        );
        return MIN_EXPIRY_PART;
    }
    if value > MAX_EXPIRY_PART {
        warn!(
            part,
            configured = ?value,
            maximum = ?MAX_EXPIRY_PART,
            "manifest expiry window too large, using maximum"
        );
        return MAX_EXPIRY_PART;
    }
    value
}
