//! # Registry Client
//!
//! Minimal OCI distribution client: resolve a reference to a manifest digest
//! and pull the image config labels plus layer blobs for a digest.
//!
//! Network and registry failures are [`UnpackError::Recoverable`]; content the
//! client cannot interpret (unsupported media types, no `linux/amd64` entry in
//! an index) is [`UnpackError::Unrecoverable`].

use crate::errors::UnpackError;
use crate::source::reference::{validate_digest, ImageReference};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::debug;

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, application/vnd.oci.image.index.v1+json, application/vnd.docker.distribution.manifest.v2+json, application/vnd.docker.distribution.manifest.list.v2+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

static CHALLENGE_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\w+)="([^"]*)""#)
        .expect("Failed to compile challenge regex - this should never happen")
});

/// A layer blob and its media type
#[derive(Debug, Clone)]
pub struct Layer {
    pub media_type: String,
    pub digest: String,
    pub data: Vec<u8>,
}

/// What the unpacker needs from an image: config labels and ordered layers
#[derive(Debug, Clone, Default)]
pub struct PulledImage {
    pub labels: BTreeMap<String, String>,
    pub layers: Vec<Layer>,
}

/// Access to a container image registry
#[async_trait]
pub trait RegistryClient: Send + Sync + std::fmt::Debug {
    /// Resolve a reference to the digest (`sha256:<hex>`) of its manifest.
    /// Digest references are returned as-is.
    async fn resolve_digest(&self, reference: &ImageReference) -> Result<String, UnpackError>;

    /// Fetch labels and layers of the image whose manifest has `digest`
    async fn pull(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<PulledImage, UnpackError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    #[serde(default)]
    media_type: String,
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// OCI distribution API client over HTTP(S) with anonymous bearer-token auth
#[derive(Debug)]
pub struct HttpRegistryClient {
    client: reqwest::Client,
    /// Bearer tokens keyed by `registry/repository`
    tokens: Mutex<HashMap<String, String>>,
}

impl HttpRegistryClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("catalogd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn cached_token(&self, reference: &ImageReference) -> Option<String> {
        self.tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(&reference.name()).cloned())
    }

    fn store_token(&self, reference: &ImageReference, token: String) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(reference.name(), token);
        }
    }

    /// Issue a request, answering a single bearer challenge if the registry asks for one
    async fn send(
        &self,
        reference: &ImageReference,
        method: Method,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response, UnpackError> {
        let build = |token: Option<&str>| {
            let mut request = self.client.request(method.clone(), url);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }
            if let Some(token) = token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            request
        };

        let token = self.cached_token(reference);
        let response = build(token.as_deref())
            .send()
            .await
            .with_context(|| format!("{method} {url}"))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let token = self.fetch_token(reference, response.headers()).await?;
        self.store_token(reference, token.clone());
        let response = build(Some(&token))
            .send()
            .await
            .with_context(|| format!("{method} {url}"))?;
        Ok(response)
    }

    async fn fetch_token(
        &self,
        reference: &ImageReference,
        headers: &HeaderMap,
    ) -> Result<String, UnpackError> {
        let challenge = headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| anyhow!("registry {} requires authentication", reference.registry()))?;
        let Some(params) = challenge.strip_prefix("Bearer ") else {
            return Err(anyhow!(
                "unsupported authentication challenge from {}: {challenge}",
                reference.registry()
            )
            .into());
        };

        let params: HashMap<&str, &str> = CHALLENGE_PARAM_RE
            .captures_iter(params)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();
        let realm = params
            .get("realm")
            .ok_or_else(|| anyhow!("bearer challenge without realm: {challenge}"))?;
        let scope = params.get("scope").map_or_else(
            || format!("repository:{}:pull", reference.repository()),
            |s| (*s).to_string(),
        );

        let mut query = vec![("scope", scope)];
        if let Some(service) = params.get("service") {
            query.push(("service", (*service).to_string()));
        }

        debug!(registry = reference.registry(), realm, "requesting anonymous bearer token");
        let response = self
            .client
            .get(*realm)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("requesting token from {realm}"))?;
        let response = check_status(response, realm)?;
        let body: TokenResponse = response
            .json()
            .await
            .with_context(|| format!("decoding token response from {realm}"))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| anyhow!("token response from {realm} carries no token").into())
    }

    async fn fetch_manifest(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<Manifest, UnpackError> {
        let url = format!("{}/manifests/{digest}", reference.api_base());
        let response = self
            .send(reference, Method::GET, &url, Some(MANIFEST_ACCEPT))
            .await?;
        let response = check_status(response, &url)?;
        let content_type = content_type(response.headers());
        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading manifest {url}"))?;
        verify_digest(&body, digest)?;

        let mut manifest: Manifest = serde_json::from_slice(&body)
            .with_context(|| format!("decoding manifest {url}"))?;
        if manifest.media_type.is_none() {
            manifest.media_type = content_type;
        }
        Ok(manifest)
    }

    async fn fetch_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<Vec<u8>, UnpackError> {
        let url = format!("{}/blobs/{digest}", reference.api_base());
        let response = self.send(reference, Method::GET, &url, None).await?;
        let response = check_status(response, &url)?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading blob {url}"))?;
        verify_digest(&body, digest)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn resolve_digest(&self, reference: &ImageReference) -> Result<String, UnpackError> {
        if let Some(digest) = reference.digest() {
            return Ok(digest.to_string());
        }

        let url = format!("{}/manifests/{}", reference.api_base(), reference.tag());
        let head = self
            .send(reference, Method::HEAD, &url, Some(MANIFEST_ACCEPT))
            .await?;
        if head.status().is_success() {
            if let Some(digest) = header_digest(&head) {
                return Ok(digest);
            }
        }

        // Registries are not required to answer HEAD with a digest header
        let response = self
            .send(reference, Method::GET, &url, Some(MANIFEST_ACCEPT))
            .await?;
        let response = check_status(response, &url)?;
        let header_digest = header_digest(&response);
        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading manifest {url}"))?;
        Ok(header_digest.unwrap_or_else(|| sha256_digest(&body)))
    }

    async fn pull(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<PulledImage, UnpackError> {
        let mut manifest = self.fetch_manifest(reference, digest).await?;

        let media_type = manifest.media_type.clone();
        match media_type.as_deref() {
            Some(MEDIA_TYPE_OCI_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST) => {
                let Some(selected) = manifest.manifests.iter().find(|m| {
                    m.platform
                        .as_ref()
                        .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
                }) else {
                    return Err(UnpackError::unrecoverable_msg(format!(
                        "image index {} has no linux/amd64 manifest",
                        reference.pinned(digest)
                    )));
                };
                let child = selected.digest.clone();
                debug!(index = digest, manifest = %child, "selected platform manifest");
                manifest = self.fetch_manifest(reference, &child).await?;
            }
            Some(MEDIA_TYPE_OCI_MANIFEST | MEDIA_TYPE_DOCKER_MANIFEST) | None => {}
            Some(other) => {
                return Err(UnpackError::unrecoverable_msg(format!(
                    "unsupported manifest media type {other:?}"
                )));
            }
        }

        let config = manifest
            .config
            .as_ref()
            .ok_or_else(|| UnpackError::unrecoverable_msg("image manifest has no config"))?;
        let config_blob = self.fetch_blob(reference, &config.digest).await?;
        let config: ConfigBlob = serde_json::from_slice(&config_blob)
            .map_err(|e| UnpackError::unrecoverable(anyhow!(e).context("decoding image config")))?;
        let labels = config
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            let data = self.fetch_blob(reference, &descriptor.digest).await?;
            layers.push(Layer {
                media_type: descriptor.media_type.clone(),
                digest: descriptor.digest.clone(),
                data,
            });
        }

        Ok(PulledImage { labels, layers })
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
}

fn check_status(response: Response, url: &str) -> Result<Response, UnpackError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(anyhow!(
            "{url}: registry returned HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
        .into())
    }
}

/// Well-formed `Docker-Content-Digest` of a response; anything else is ignored
fn header_digest(response: &Response) -> Option<String> {
    response
        .headers()
        .get(DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|digest| validate_digest(digest).is_ok())
        .map(str::to_string)
}

/// `sha256:<hex>` of `data`
#[must_use]
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

fn verify_digest(data: &[u8], expected: &str) -> Result<(), UnpackError> {
    if !expected.starts_with("sha256:") {
        return Err(UnpackError::unrecoverable_msg(format!(
            "unsupported digest algorithm in {expected:?}"
        )));
    }
    let actual = sha256_digest(data);
    if actual != expected {
        return Err(anyhow!("digest mismatch: expected {expected}, got {actual}").into());
    }
    Ok(())
}
