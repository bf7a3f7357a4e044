//! Content digests for layers and manifests
//!
//! A digest is `algorithm:hex`, the same form registries use. It doubles as
//! the arena's cache key and, via [`LayerDigest::file_name`], as the on-disk
//! file name of a fetched layer.

use crate::error::{IndexerError, IndexerResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Number of hex characters in an encoded digest of this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content hash uniquely identifying a blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerDigest {
    algorithm: Algorithm,
    hex: String,
}

impl LayerDigest {
    /// Parse `algorithm:hex`
    pub fn parse(s: &str) -> IndexerResult<Self> {
        let (alg, hex) = s
            .split_once(':')
            .ok_or_else(|| IndexerError::invalid_digest(s, "missing ':' separator"))?;

        let algorithm = Algorithm::parse(alg).ok_or_else(|| {
            IndexerError::invalid_digest(s, format!("unsupported algorithm {alg:?}"))
        })?;

        if hex.len() != algorithm.hex_len() {
            return Err(IndexerError::invalid_digest(
                s,
                format!("expected {} hex characters, got {}", algorithm.hex_len(), hex.len()),
            ));
        }
        if !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(IndexerError::invalid_digest(s, "not lowercase hex"));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Digest of the given bytes
    pub fn of(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut hasher = DigestHasher::new(algorithm);
        hasher.update(data);
        hasher.finish()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// File name used for this digest inside a directory (no ':' on disk)
    pub fn file_name(&self) -> String {
        format!("{}-{}", self.algorithm, self.hex)
    }

    /// Short form for log lines
    pub fn short(&self) -> &str {
        &self.hex[..12]
    }
}

impl fmt::Display for LayerDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for LayerDigest {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LayerDigest {
    type Error = IndexerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<LayerDigest> for String {
    fn from(d: LayerDigest) -> Self {
        d.to_string()
    }
}

/// Incremental hasher producing a [`LayerDigest`]
pub enum DigestHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl DigestHasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Self::Sha256(Sha256::new()),
            Algorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub fn finish(self) -> LayerDigest {
        let (algorithm, hex) = match self {
            Self::Sha256(h) => (Algorithm::Sha256, hex::encode(h.finalize())),
            Self::Sha512(h) => (Algorithm::Sha512, hex::encode(h.finalize())),
        };
        LayerDigest { algorithm, hex }
    }
}
