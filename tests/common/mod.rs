//! Common test utilities for integration tests
//!
//! Provides an in-process OCI registry serving images built from in-memory
//! layers, plus helpers to build layers and `Catalog` resources.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use catalogd::crd::Catalog;
use catalogd::source::registry::{MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

pub const CONFIG_DIR_LABEL: &str = "operators.operatorframework.io.index.configs.v1";
pub const MEDIA_TYPE_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
const TEST_TOKEN: &str = "test-token";

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn sha256(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

/// Build a gzip-compressed tar layer holding `files`
pub fn tar_gz_layer(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A `Catalog` with an image source
pub fn image_catalog(name: &str, reference: &str) -> Catalog {
    serde_json::from_value(json!({
        "apiVersion": "catalogd.operatorframework.io/v1alpha1",
        "kind": "Catalog",
        "metadata": {
            "name": name,
            "generation": 1,
            "finalizers": ["catalogd.operatorframework.io/delete-server-cache"],
        },
        "spec": { "source": { "type": "image", "image": { "ref": reference } } },
    }))
    .unwrap()
}

/// Image content to push into the mock registry
#[derive(Debug, Default, Clone)]
pub struct TestImage {
    labels: HashMap<String, String>,
    layers: Vec<Vec<u8>>,
}

impl TestImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image whose `configs/` directory holds `files`, labelled accordingly
    pub fn catalog(files: &[(&str, &str)]) -> Self {
        let files: Vec<(String, &str)> = files
            .iter()
            .map(|(path, contents)| (format!("configs/{path}"), *contents))
            .collect();
        let files: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), *c)).collect();
        Self::new()
            .label(CONFIG_DIR_LABEL, "/configs")
            .layer(tar_gz_layer(&files))
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn layer(mut self, data: Vec<u8>) -> Self {
        self.layers.push(data);
        self
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Manifests by `repository` then tag or digest: (media type, body)
    manifests: HashMap<String, HashMap<String, (String, Vec<u8>)>>,
    blobs: HashMap<String, Vec<u8>>,
    require_token: bool,
    digest_headers: bool,
    /// Sent instead of the real digest when set
    forged_digest_header: Option<String>,
    requests: Vec<String>,
    token_requests: usize,
}

/// In-process OCI distribution registry, stopped on drop
#[derive(Debug)]
pub struct MockRegistry {
    state: Arc<Mutex<RegistryState>>,
    host: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for MockRegistry {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockRegistry {
    /// Start a registry on a random local port
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(RegistryState {
            digest_headers: true,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/token", get(token_handler))
            .route("/v2/{*path}", get(distribution_handler))
            .with_state((Arc::clone(&state), host.clone()));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            host,
            handle,
        }
    }

    /// `host:port` of the registry
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Full reference to `repository:tag` on this registry
    pub fn reference(&self, repository: &str, tag: &str) -> String {
        format!("{}/{repository}:{tag}", self.host)
    }

    /// Answer with 401 and a bearer challenge until a token is presented
    pub fn require_token(&self) {
        self.state.lock().unwrap().require_token = true;
    }

    /// Omit `Docker-Content-Digest` from manifest responses
    pub fn without_digest_headers(&self) {
        self.state.lock().unwrap().digest_headers = false;
    }

    /// Answer manifest requests with `value` as `Docker-Content-Digest`
    pub fn with_forged_digest_header(&self, value: &str) {
        self.state.lock().unwrap().forged_digest_header = Some(value.to_string());
    }

    /// Requests served so far, as `METHOD /path`
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn token_requests(&self) -> usize {
        self.state.lock().unwrap().token_requests
    }

    /// Push `image` as `repository:tag`, returning the manifest digest
    pub fn push(&self, repository: &str, tag: &str, image: &TestImage) -> String {
        let (digest, media_type, body) = self.push_manifest(repository, image);
        self.tag(repository, tag, &digest, &media_type, body);
        digest
    }

    /// Push `image` wrapped in an index holding it for `os/arch`, returning the index digest
    pub fn push_index(
        &self,
        repository: &str,
        tag: &str,
        image: &TestImage,
        os: &str,
        arch: &str,
    ) -> String {
        let (child, _, body) = self.push_manifest(repository, image);
        let index = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": [{
                "mediaType": MEDIA_TYPE_OCI_MANIFEST,
                "digest": child,
                "size": body.len(),
                "platform": { "os": os, "architecture": arch },
            }],
        }))
        .unwrap();
        let digest = sha256(&index);
        self.tag(repository, tag, &digest, MEDIA_TYPE_OCI_INDEX, index);
        digest
    }

    fn push_manifest(&self, repository: &str, image: &TestImage) -> (String, String, Vec<u8>) {
        let mut state = self.state.lock().unwrap();

        let config = serde_json::to_vec(&json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": image.labels },
            "rootfs": { "type": "layers", "diff_ids": [] },
        }))
        .unwrap();
        let config_digest = sha256(&config);
        let config_size = config.len();
        state.blobs.insert(config_digest.clone(), config);

        let mut layers = Vec::new();
        for data in &image.layers {
            let digest = sha256(data);
            layers.push(json!({
                "mediaType": MEDIA_TYPE_TAR_GZIP,
                "digest": digest,
                "size": data.len(),
            }));
            state.blobs.insert(digest, data.clone());
        }

        let manifest = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": {
                "mediaType": MEDIA_TYPE_OCI_CONFIG,
                "digest": config_digest,
                "size": config_size,
            },
            "layers": layers,
        }))
        .unwrap();
        let digest = sha256(&manifest);
        state
            .manifests
            .entry(repository.to_string())
            .or_default()
            .insert(digest.clone(), (MEDIA_TYPE_OCI_MANIFEST.to_string(), manifest.clone()));
        (digest, MEDIA_TYPE_OCI_MANIFEST.to_string(), manifest)
    }

    fn tag(&self, repository: &str, tag: &str, digest: &str, media_type: &str, body: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let manifests = state.manifests.entry(repository.to_string()).or_default();
        manifests.insert(digest.to_string(), (media_type.to_string(), body.clone()));
        manifests.insert(tag.to_string(), (media_type.to_string(), body));
    }
}

type AppState = (Arc<Mutex<RegistryState>>, String);

async fn token_handler(State((state, _)): State<AppState>) -> Json<serde_json::Value> {
    state.lock().unwrap().token_requests += 1;
    Json(json!({ "token": TEST_TOKEN }))
}

async fn distribution_handler(
    State((state, host)): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("{method} /v2/{path}"));

    let (repository, kind, reference) =
        if let Some((repo, reference)) = path.split_once("/manifests/") {
            (repo.to_string(), "manifests", reference.to_string())
        } else if let Some((repo, reference)) = path.split_once("/blobs/") {
            (repo.to_string(), "blobs", reference.to_string())
        } else {
            return StatusCode::NOT_FOUND.into_response();
        };

    if state.require_token {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(format!("Bearer {TEST_TOKEN}").as_str());
        if !authorized {
            let challenge = format!(
                r#"Bearer realm="http://{host}/token",service="mock-registry",scope="repository:{repository}:pull""#
            );
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, challenge)],
            )
                .into_response();
        }
    }

    if kind == "blobs" {
        return match state.blobs.get(&reference) {
            Some(data) => (StatusCode::OK, data.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let Some((media_type, body)) = state
        .manifests
        .get(&repository)
        .and_then(|m| m.get(&reference))
        .cloned()
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut response =
        (StatusCode::OK, [(header::CONTENT_TYPE, media_type)], body.clone()).into_response();
    if state.digest_headers {
        let digest = state
            .forged_digest_header
            .clone()
            .unwrap_or_else(|| sha256(&body));
        if let Ok(value) = digest.parse() {
            response.headers_mut().insert("docker-content-digest", value);
        }
    }
    response
}
