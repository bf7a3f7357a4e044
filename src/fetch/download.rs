//! Layer download pipeline
//!
//! Streams a blob from the registry into a temp file inside the arena root,
//! verifying its digest on the way, then decompresses it into a second temp
//! file. The result is a persisted temp path; moving it to its final name is
//! the arena's job.

use crate::digest::DigestHasher;
use crate::error::{IndexerError, IndexerResult};
use crate::registry::{media_types, RegistryClient, RemoteLayer};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Prefix of every temp file the pipeline creates in the arena root
pub const TEMP_PREFIX: &str = ".fetch-";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Compression applied to a layer blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Determine compression from a layer media type
    pub fn from_media_type(media_type: &str) -> IndexerResult<Self> {
        match media_type {
            media_types::OCI_LAYER | media_types::DOCKER_LAYER => Ok(Self::None),
            media_types::OCI_LAYER_GZIP | media_types::DOCKER_LAYER_GZIP => Ok(Self::Gzip),
            media_types::OCI_LAYER_ZSTD => Ok(Self::Zstd),
            other if other.ends_with("+gzip") => Ok(Self::Gzip),
            other if other.ends_with("+zstd") => Ok(Self::Zstd),
            other => Err(IndexerError::UnsupportedMediaType(other.to_string())),
        }
    }
}

fn temp_file(root: &Path, suffix: &str) -> IndexerResult<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(suffix)
        .tempfile_in(root)
        .map_err(|e| IndexerError::io(format!("creating temp file in {}", root.display()), e))
}

fn keep(path: TempPath) -> IndexerResult<PathBuf> {
    path.keep()
        .map_err(|e| IndexerError::io("persisting fetched layer", e.error))
}

/// Download, verify and decompress one layer into a temp file under `root`.
///
/// On any error the partial files are removed.
pub async fn fetch_layer(
    registry: Arc<dyn RegistryClient>,
    layer: RemoteLayer,
    root: PathBuf,
) -> IndexerResult<PathBuf> {
    let compression = Compression::from_media_type(&layer.media_type)?;

    let mut stream = registry.download(&layer).await?;
    let (file, blob_path) = temp_file(&root, ".blob")?.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut hasher = DigestHasher::new(layer.digest.algorithm());
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| IndexerError::io(format!("reading layer {}", layer.digest), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .await
            .map_err(|e| IndexerError::io(format!("writing layer {}", layer.digest), e))?;
        written += n as u64;
    }
    file.flush()
        .await
        .map_err(|e| IndexerError::io(format!("flushing layer {}", layer.digest), e))?;
    drop(file);

    let actual = hasher.finish();
    if actual != layer.digest {
        return Err(IndexerError::DigestMismatch {
            expected: layer.digest.to_string(),
            actual: actual.to_string(),
        });
    }
    debug!(digest = %layer.digest, bytes = written, ?compression, "downloaded layer blob");

    if compression == Compression::None {
        return keep(blob_path);
    }

    let output = temp_file(&root, ".tar")?;
    let digest = layer.digest.to_string();
    tokio::task::spawn_blocking(move || decompress(compression, blob_path, output))
        .await
        .map_err(|e| IndexerError::Task(e.to_string()))?
        .map_err(|e| IndexerError::io(format!("decompressing layer {digest}"), e))
        .and_then(keep)
}

/// Blocking: `blob` is removed when this returns, `output` is kept only on success
fn decompress(
    compression: Compression,
    blob: TempPath,
    mut output: NamedTempFile,
) -> io::Result<TempPath> {
    let input = std::fs::File::open(&blob)?;
    let mut reader: Box<dyn io::Read> = match compression {
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(io::BufReader::new(input))),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(input)?),
        Compression::None => Box::new(input),
    };
    io::copy(&mut reader, output.as_file_mut())?;
    output.as_file().sync_all()?;
    Ok(output.into_temp_path())
}
