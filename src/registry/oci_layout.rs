//! Registry client backed by OCI image layouts on disk
//!
//! Each repository is a directory under the root holding a standard OCI
//! image layout:
//!
//! ```text
//! <root>/<repository>/index.json
//! <root>/<repository>/blobs/sha256/<hex>
//! ```
//!
//! Tags are matched against the `org.opencontainers.image.ref.name`
//! annotation of the top-level index.

use crate::digest::LayerDigest;
use crate::error::{IndexerError, IndexerResult};
use crate::registry::{
    media_types, ImageReference, LayerStream, Manifest, Platform, RegistryClient, RemoteLayer,
    ResolveOptions, ResolvedImage,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Nested indexes deeper than this are rejected
const MAX_INDEX_DEPTH: usize = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    #[serde(default)]
    media_type: String,
    digest: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    annotations: HashMap<String, String>,
    platform: Option<DescriptorPlatform>,
}

#[derive(Debug, Clone, Deserialize)]
struct DescriptorPlatform {
    os: String,
    architecture: String,
}

/// Either an image index or an image manifest; both shapes share one struct
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

impl Document {
    fn is_index(&self) -> bool {
        match self.media_type.as_deref() {
            Some(media_types::OCI_INDEX) | Some(media_types::DOCKER_MANIFEST_LIST) => true,
            Some(_) => false,
            None => !self.manifests.is_empty(),
        }
    }
}

/// Registry client over a directory of OCI image layouts
#[derive(Debug, Clone)]
pub struct OciLayoutRegistry {
    root: PathBuf,
}

impl OciLayoutRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repository_dir(&self, reference: &ImageReference) -> PathBuf {
        self.root.join(reference.repository())
    }

    fn blob_path(repo_dir: &Path, digest: &LayerDigest) -> PathBuf {
        repo_dir
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    async fn read_index(&self, reference: &ImageReference) -> IndexerResult<Document> {
        let path = self.repository_dir(reference).join("index.json");
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexerError::ManifestNotFound(reference.to_string()))
            }
            Err(e) => return Err(IndexerError::io(format!("reading {}", path.display()), e)),
        };
        serde_json::from_slice(&content)
            .map_err(|e| IndexerError::registry(reference.to_string(), format!("index.json: {e}")))
    }

    /// Read a blob and check it hashes to its digest
    async fn read_blob(&self, repo_dir: &Path, digest: &LayerDigest) -> IndexerResult<Vec<u8>> {
        let path = Self::blob_path(repo_dir, digest);
        let content = fs::read(&path)
            .await
            .map_err(|e| IndexerError::io(format!("reading blob {}", path.display()), e))?;

        let actual = LayerDigest::of(digest.algorithm(), &content);
        if &actual != digest {
            return Err(IndexerError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(content)
    }

    fn select_top_level(
        index: &Document,
        reference: &ImageReference,
    ) -> IndexerResult<LayerDigest> {
        if let Some(digest) = reference.digest() {
            // A digest reference may also name a blob that is not listed in index.json.
            return Ok(digest.clone());
        }

        let tag = reference.tag().unwrap_or("latest");
        let descriptor = index
            .manifests
            .iter()
            .find(|d| d.annotations.get(REF_NAME_ANNOTATION).map(String::as_str) == Some(tag))
            .ok_or_else(|| IndexerError::ManifestNotFound(reference.to_string()))?;

        LayerDigest::parse(&descriptor.digest)
    }

    fn select_platform<'a>(
        manifests: &'a [Descriptor],
        platform: &Platform,
    ) -> Option<&'a Descriptor> {
        manifests
            .iter()
            .find(|d| {
                d.platform.as_ref().is_some_and(|p| {
                    p.os == platform.os && p.architecture == platform.architecture
                })
            })
            .or_else(|| manifests.first())
    }
}

#[async_trait]
impl RegistryClient for OciLayoutRegistry {
    async fn resolve(
        &self,
        reference: &ImageReference,
        opts: &ResolveOptions,
    ) -> IndexerResult<ResolvedImage> {
        let repo_dir = self.repository_dir(reference);
        let index = self.read_index(reference).await?;

        let mut manifest_digest = Self::select_top_level(&index, reference)?;
        let mut depth = 0;
        let document = loop {
            let blob = self.read_blob(&repo_dir, &manifest_digest).await?;
            let document: Document = serde_json::from_slice(&blob).map_err(|e| {
                IndexerError::registry(reference.to_string(), format!("manifest: {e}"))
            })?;

            if !document.is_index() {
                break document;
            }

            depth += 1;
            if depth > MAX_INDEX_DEPTH {
                return Err(IndexerError::registry(
                    reference.to_string(),
                    "image index nesting too deep",
                ));
            }
            let descriptor = Self::select_platform(&document.manifests, &opts.platform)
                .ok_or_else(|| IndexerError::ManifestNotFound(reference.to_string()))?;
            manifest_digest = LayerDigest::parse(&descriptor.digest)?;
        };

        let mut layers = Vec::with_capacity(document.layers.len());
        for descriptor in &document.layers {
            let digest = LayerDigest::parse(&descriptor.digest)?;
            let source = Self::blob_path(&repo_dir, &digest);
            layers.push(RemoteLayer {
                digest,
                media_type: descriptor.media_type.clone(),
                size: descriptor.size,
                source: source.display().to_string(),
            });
        }

        debug!(
            reference = %reference,
            manifest = %manifest_digest,
            layers = layers.len(),
            "resolved image from OCI layout"
        );

        Ok(ResolvedImage {
            manifest: Manifest {
                digest: manifest_digest,
                layers: layers.iter().map(|l| l.digest.clone()).collect(),
            },
            layers,
        })
    }

    async fn download(&self, layer: &RemoteLayer) -> IndexerResult<LayerStream> {
        let file = fs::File::open(&layer.source)
            .await
            .map_err(|e| IndexerError::io(format!("opening layer blob {}", layer.source), e))?;
        Ok(Box::pin(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn write_blob(repo: &Path, content: &[u8]) -> LayerDigest {
        let digest = LayerDigest::of(Algorithm::Sha256, content);
        let dir = repo.join("blobs").join("sha256");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(digest.hex()), content).unwrap();
        digest
    }

    fn write_image(repo: &Path, layers: &[&[u8]]) -> LayerDigest {
        let layer_descs: Vec<_> = layers
            .iter()
            .map(|content| {
                let d = write_blob(repo, content);
                json!({
                    "mediaType": media_types::OCI_LAYER,
                    "digest": d.to_string(),
                    "size": content.len(),
                })
            })
            .collect();
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": media_types::OCI_MANIFEST,
            "layers": layer_descs,
        });
        write_blob(repo, manifest.to_string().as_bytes())
    }

    fn write_index(repo: &Path, entries: serde_json::Value) {
        let index = json!({ "schemaVersion": 2, "manifests": entries });
        std::fs::create_dir_all(repo).unwrap();
        std::fs::write(repo.join("index.json"), index.to_string()).unwrap();
    }

    #[tokio::test]
    async fn resolves_tag_and_downloads_layer() {
        let root = TempDir::new().unwrap();
        let repo = root.path().join("library/app");
        let manifest = write_image(&repo, &[b"layer one", b"layer two"]);
        write_index(
            &repo,
            json!([{
                "mediaType": media_types::OCI_MANIFEST,
                "digest": manifest.to_string(),
                "size": 0,
                "annotations": { "org.opencontainers.image.ref.name": "1.0" },
            }]),
        );

        let registry = OciLayoutRegistry::new(root.path());
        let reference = ImageReference::parse("library/app:1.0").unwrap();
        let resolved = registry
            .resolve(&reference, &ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(resolved.manifest.digest, manifest);
        assert_eq!(resolved.layers.len(), 2);

        let mut stream = registry.download(&resolved.layers[1]).await.unwrap();
        let mut content = Vec::new();
        stream.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"layer two");
    }

    #[tokio::test]
    async fn picks_platform_from_nested_index() {
        let root = TempDir::new().unwrap();
        let repo = root.path().join("app");
        let amd = write_image(&repo, &[b"amd64 layer"]);
        let arm = write_image(&repo, &[b"arm64 layer"]);
        let nested = json!({
            "schemaVersion": 2,
            "mediaType": media_types::OCI_INDEX,
            "manifests": [
                { "digest": amd.to_string(), "platform": { "os": "linux", "architecture": "amd64" } },
                { "digest": arm.to_string(), "platform": { "os": "linux", "architecture": "arm64" } },
            ],
        });
        let nested_digest = write_blob(&repo, nested.to_string().as_bytes());
        write_index(
            &repo,
            json!([{ "digest": nested_digest.to_string(), "annotations": { "org.opencontainers.image.ref.name": "latest" } }]),
        );

        let registry = OciLayoutRegistry::new(root.path());
        let opts = ResolveOptions {
            platform: Platform::parse("linux/arm64").unwrap(),
            ..Default::default()
        };
        let resolved = registry
            .resolve(&ImageReference::parse("app").unwrap(), &opts)
            .await
            .unwrap();

        assert_eq!(resolved.manifest.digest, arm);
    }

    #[tokio::test]
    async fn unknown_tag_is_not_found() {
        let root = TempDir::new().unwrap();
        let repo = root.path().join("app");
        write_index(&repo, json!([]));

        let registry = OciLayoutRegistry::new(root.path());
        let err = registry
            .resolve(&ImageReference::parse("app:nope").unwrap(), &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::ManifestNotFound(_)));

        let err = registry
            .resolve(&ImageReference::parse("missing").unwrap(), &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::ManifestNotFound(_)));
    }

    #[tokio::test]
    async fn corrupted_manifest_blob_is_rejected() {
        let root = TempDir::new().unwrap();
        let repo = root.path().join("app");
        let manifest = write_image(&repo, &[b"layer"]);
        std::fs::write(
            repo.join("blobs/sha256").join(manifest.hex()),
            b"{\"layers\": []}",
        )
        .unwrap();
        write_index(
            &repo,
            json!([{ "digest": manifest.to_string(), "annotations": { "org.opencontainers.image.ref.name": "latest" } }]),
        );

        let registry = OciLayoutRegistry::new(root.path());
        let err = registry
            .resolve(&ImageReference::parse("app").unwrap(), &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::DigestMismatch { .. }));
    }
}
