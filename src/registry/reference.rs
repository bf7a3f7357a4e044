//! Image reference parsing
//!
//! Accepts `[registry/]repository[:tag][@digest]`, and the URL form
//! `https://registry/repository:tag` used by callers that address images by
//! URL. A bare repository defaults to the `latest` tag.

use crate::digest::LayerDigest;
use crate::error::{IndexerError, IndexerResult};
use std::fmt;

const DEFAULT_TAG: &str = "latest";
const MAX_TAG_LEN: usize = 128;

/// A parsed, validated image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<LayerDigest>,
    insecure: bool,
}

impl ImageReference {
    /// Parse a plain reference such as `quay.io/org/app:1.2` or `app@sha256:...`
    pub fn parse(reference: &str) -> IndexerResult<Self> {
        if reference.is_empty() {
            return Err(IndexerError::invalid_reference(reference, "empty"));
        }

        let (name_and_tag, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(LayerDigest::parse(digest)?)),
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
        let last_slash = name_and_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name_and_tag[..split], Some(&name_and_tag[split + 1..]))
            }
            None => (name_and_tag, None),
        };

        if let Some(tag) = tag {
            validate_tag(reference, tag)?;
        }

        let mut components: Vec<&str> = name.split('/').collect();
        let registry = if components.len() > 1 && is_registry_host(components[0]) {
            Some(components.remove(0).to_string())
        } else {
            None
        };

        for component in &components {
            validate_component(reference, component)?;
        }

        let tag = match (tag, &digest) {
            (Some(t), _) => Some(t.to_string()),
            (None, Some(_)) => None,
            (None, None) => Some(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository: components.join("/"),
            tag,
            digest,
            insecure: false,
        })
    }

    /// Parse an `http://` or `https://` image URL. `http` marks the registry insecure.
    pub fn parse_url(url: &str) -> IndexerResult<Self> {
        if url.is_empty() {
            return Err(IndexerError::invalid_reference(url, "invalid URL: empty"));
        }
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| IndexerError::invalid_reference(url, "missing URL scheme"))?;

        let insecure = match scheme {
            "http" => true,
            "https" => false,
            other => {
                return Err(IndexerError::invalid_reference(
                    url,
                    format!("invalid URL scheme {other:?}"),
                ))
            }
        };

        let mut reference = Self::parse(rest)?;
        if reference.registry.is_none() {
            return Err(IndexerError::invalid_reference(url, "URL has no registry host"));
        }
        reference.insecure = insecure;
        Ok(reference)
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&LayerDigest> {
        self.digest.as_ref()
    }

    /// Whether the registry should be reached over plain HTTP
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_component(reference: &str, component: &str) -> IndexerResult<()> {
    if component.is_empty() {
        return Err(IndexerError::invalid_reference(reference, "empty path component"));
    }
    let valid = component
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    let starts_ok = component
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !valid || !starts_ok {
        return Err(IndexerError::invalid_reference(
            reference,
            format!("invalid repository component {component:?}"),
        ));
    }
    Ok(())
}

fn validate_tag(reference: &str, tag: &str) -> IndexerResult<()> {
    let valid = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(IndexerError::invalid_reference(
            reference,
            format!("invalid tag {tag:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn bare_repository_defaults_to_latest() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry(), None);
        assert_eq!(r.repository(), "alpine");
        assert_eq!(r.tag(), Some("latest"));
        assert_eq!(r.to_string(), "alpine:latest");
    }

    #[test]
    fn registry_with_port_and_tag() {
        let r = ImageReference::parse("localhost:5000/library/nginx:1.25").unwrap();
        assert_eq!(r.registry(), Some("localhost:5000"));
        assert_eq!(r.repository(), "library/nginx");
        assert_eq!(r.tag(), Some("1.25"));
    }

    #[test]
    fn digest_reference_has_no_default_tag() {
        let r = ImageReference::parse(&format!("quay.io/org/app@{DIGEST}")).unwrap();
        assert_eq!(r.tag(), None);
        assert_eq!(r.digest().unwrap().to_string(), DIGEST);
    }

    #[test]
    fn rejects_malformed() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("Upper/Case").is_err());
        assert!(ImageReference::parse("app:").is_err());
        assert!(ImageReference::parse("app:-bad").is_err());
        assert!(ImageReference::parse("org//app").is_err());
        assert!(ImageReference::parse("app@sha256:nothex").is_err());
    }

    #[test]
    fn url_scheme_controls_insecure() {
        let r = ImageReference::parse_url("http://localhost:5000/app:1").unwrap();
        assert!(r.is_insecure());
        let r = ImageReference::parse_url("https://quay.io/org/app:1").unwrap();
        assert!(!r.is_insecure());
        assert!(ImageReference::parse_url("ftp://quay.io/org/app").is_err());
        assert!(ImageReference::parse_url("quay.io/org/app").is_err());
        assert!(ImageReference::parse_url("").is_err());
    }
}
