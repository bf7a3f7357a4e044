//! In-process manifest store
//!
//! Holds both manifest content (a set of IDs) and expiration metadata. A GC
//! pass removes the metadata row and the content together, under one lock.
//! The tables can be snapshotted to a JSON file and loaded back.

use crate::error::{IndexerError, IndexerResult};
use crate::manifest::store::{GcOptions, ManifestContentStore, ManifestMetadataStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    content: BTreeSet<String>,
    metadata: BTreeMap<String, DateTime<Utc>>,
}

/// Manifest content and metadata kept in memory
#[derive(Default)]
pub struct MemoryManifestStore {
    tables: Mutex<Tables>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record manifest content without any metadata row
    pub fn add_content(&self, manifest_id: impl Into<String>) {
        self.tables.lock().content.insert(manifest_id.into());
    }

    pub fn has_content(&self, manifest_id: &str) -> bool {
        self.tables.lock().content.contains(manifest_id)
    }

    pub fn expiration(&self, manifest_id: &str) -> Option<DateTime<Utc>> {
        self.tables.lock().metadata.get(manifest_id).copied()
    }

    /// Number of metadata rows
    pub fn metadata_len(&self) -> usize {
        self.tables.lock().metadata.len()
    }

    /// Load a snapshot written by [`save`](Self::save); a missing file is an empty store
    pub async fn load(path: &Path) -> IndexerResult<Self> {
        let tables = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Tables::default(),
            Err(e) => {
                return Err(IndexerError::io(
                    format!("reading manifest store {}", path.display()),
                    e,
                ))
            }
        };
        debug!(
            path = %path.display(),
            content = tables.content.len(),
            metadata = tables.metadata.len(),
            "loaded manifest store"
        );
        Ok(Self {
            tables: Mutex::new(tables),
        })
    }

    /// Write the tables to `path`, replacing it atomically
    pub fn save(&self, path: &Path) -> IndexerResult<()> {
        let bytes = serde_json::to_vec_pretty(&*self.tables.lock())?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let context = || format!("writing manifest store {}", path.display());

        std::fs::create_dir_all(dir).map_err(|e| IndexerError::io(context(), e))?;
        let mut file = NamedTempFile::new_in(dir).map_err(|e| IndexerError::io(context(), e))?;
        file.write_all(&bytes)
            .map_err(|e| IndexerError::io(context(), e))?;
        file.persist(path)
            .map_err(|e| IndexerError::io(context(), e.error))?;
        Ok(())
    }
}

#[async_trait]
impl ManifestMetadataStore for MemoryManifestStore {
    async fn migrate_manifests(
        &self,
        expiry: &mut (dyn FnMut() -> DateTime<Utc> + Send),
    ) -> IndexerResult<Vec<String>> {
        let mut tables = self.tables.lock();
        let Tables { content, metadata } = &mut *tables;

        let mut migrated = Vec::new();
        for id in content.iter() {
            if !metadata.contains_key(id) {
                metadata.insert(id.clone(), expiry());
                migrated.push(id.clone());
            }
        }
        debug!(count = migrated.len(), "migrated manifests to metadata");
        Ok(migrated)
    }

    async fn store_manifest(
        &self,
        manifest_id: &str,
        expiration: DateTime<Utc>,
    ) -> IndexerResult<()> {
        self.tables
            .lock()
            .metadata
            .insert(manifest_id.to_string(), expiration);
        Ok(())
    }

    async fn manifest_exists(&self, manifest_id: &str) -> IndexerResult<bool> {
        Ok(self.tables.lock().metadata.contains_key(manifest_id))
    }

    async fn gc_manifests(
        &self,
        cutoff: DateTime<Utc>,
        opts: &GcOptions,
    ) -> IndexerResult<Vec<String>> {
        let mut tables = self.tables.lock();

        let mut expired: Vec<(DateTime<Utc>, String)> = tables
            .metadata
            .iter()
            .filter(|(_, expiration)| **expiration < cutoff)
            .map(|(id, expiration)| (*expiration, id.clone()))
            .collect();
        expired.sort();
        if let Some(limit) = opts.limit {
            expired.truncate(limit);
        }

        let deleted: Vec<String> = expired.into_iter().map(|(_, id)| id).collect();
        for id in &deleted {
            tables.metadata.remove(id);
            tables.content.remove(id);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl ManifestContentStore for MemoryManifestStore {
    async fn delete_manifests(&self, manifest_ids: &[String]) -> IndexerResult<Vec<String>> {
        let mut tables = self.tables.lock();
        Ok(manifest_ids
            .iter()
            .filter(|id| tables.content.remove(id.as_str()))
            .cloned()
            .collect())
    }
}
