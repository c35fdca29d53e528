//! # Image References
//!
//! Parsing of `[registry/]repository[:tag][@sha256:<hex>]` references.

use anyhow::{bail, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Registry assumed when the reference does not name one
pub const DEFAULT_REGISTRY: &str = "docker.io";
/// API endpoint serving the default registry
const DEFAULT_REGISTRY_API_HOST: &str = "registry-1.docker.io";
pub const DEFAULT_TAG: &str = "latest";

static REGISTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9.-]*[a-zA-Z0-9])?(?::[0-9]+)?$")
        .expect("Failed to compile registry regex - this should never happen")
});

static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
        .expect("Failed to compile repository regex - this should never happen")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w][\w.-]{0,127}$")
        .expect("Failed to compile tag regex - this should never happen")
});

static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sha256:[a-f0-9]{64}$")
        .expect("Failed to compile digest regex - this should never happen")
});

/// A parsed container image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// The first path component is treated as a registry host when it
    /// contains `.` or `:` or is `localhost`.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            bail!("image reference is empty");
        }

        let (name_and_tag, digest) = match input.split_once('@') {
            Some((rest, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    bail!("invalid digest {digest:?} in reference {input:?}");
                }
                (rest, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port
        let last_slash = name_and_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name_and_tag[split + 1..];
                if !TAG_RE.is_match(tag) {
                    bail!("invalid tag {tag:?} in reference {input:?}");
                }
                (&name_and_tag[..split], Some(tag.to_string()))
            }
            None => (name_and_tag, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                if !REGISTRY_RE.is_match(first) {
                    bail!("invalid registry {first:?} in reference {input:?}");
                }
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if !REPOSITORY_RE.is_match(&repository) {
            bail!("invalid repository {repository:?} in reference {input:?}");
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, defaulting to `latest`
    #[must_use]
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Digest (`sha256:<hex>`) when the reference is pinned
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Fully qualified repository name, `registry/repository`
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Reference pinned to `digest`: `registry/repository@sha256:<hex>`
    #[must_use]
    pub fn pinned(&self, digest: &str) -> String {
        format!("{}@{}", self.name(), digest)
    }

    /// Host serving the distribution API for this registry
    #[must_use]
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DEFAULT_REGISTRY_API_HOST
        } else {
            &self.registry
        }
    }

    /// Local registries are spoken to over plain HTTP
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        let host = self
            .registry
            .rsplit_once(':')
            .map_or(self.registry.as_str(), |(host, _)| host);
        if host == "localhost" || host == "127.0.0.1" || host.ends_with(".local") {
            "http"
        } else {
            "https"
        }
    }

    /// Base URL of the repository's distribution API, `scheme://host/v2/repository`
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}://{}/v2/{}", self.scheme(), self.api_host(), self.repository)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Check that `digest` is a well-formed `sha256:<64 hex>` digest
///
/// # Errors
///
/// Returns an error naming the digest when it is malformed.
pub fn validate_digest(digest: &str) -> Result<()> {
    if !DIGEST_RE.is_match(digest) {
        bail!("invalid digest {digest:?}");
    }
    Ok(())
}

/// Hex portion of a `sha256:<hex>` digest
#[must_use]
pub fn digest_hex(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}
