//! Stores the manifest manager works against

use crate::error::IndexerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Options for one garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcOptions {
    /// Maximum rows deleted per pass; `None` deletes everything expired
    pub limit: Option<usize>,
}

/// Expiration metadata, one row per manifest
#[async_trait]
pub trait ManifestMetadataStore: Send + Sync {
    /// Insert a row for every stored manifest that has none, with the
    /// expiration produced by `expiry`, called once per inserted row.
    /// Returns the migrated manifest IDs.
    async fn migrate_manifests(
        &self,
        expiry: &mut (dyn FnMut() -> DateTime<Utc> + Send),
    ) -> IndexerResult<Vec<String>>;

    /// Insert or replace the row for `manifest_id`
    async fn store_manifest(
        &self,
        manifest_id: &str,
        expiration: DateTime<Utc>,
    ) -> IndexerResult<()>;

    async fn manifest_exists(&self, manifest_id: &str) -> IndexerResult<bool>;

    /// Delete rows expiring strictly before `cutoff`, oldest first.
    /// Returns the deleted manifest IDs.
    async fn gc_manifests(
        &self,
        cutoff: DateTime<Utc>,
        opts: &GcOptions,
    ) -> IndexerResult<Vec<String>>;
}

/// Bulk manifest content, cleaned up after its metadata expires
#[async_trait]
pub trait ManifestContentStore: Send + Sync {
    /// Delete content for `manifest_ids`; returns the IDs actually removed
    async fn delete_manifests(&self, manifest_ids: &[String]) -> IndexerResult<Vec<String>>;
}
