//! # Reconcile Tests
//!
//! Drives `reconcile` against an in-process API server that enforces
//! `metadata.resourceVersion` on patches the way the real one does.

mod common;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::patch;
use axum::{Json, Router};
use catalogd::controller::reconciler::{
    reconcile, BackoffState, CatalogPipeline, Reconciler,
};
use catalogd::crd::{Catalog, SourceType};
use catalogd::prelude::{ImageRegistry, LocalDir, SourceUnpacker, Unpacker};
use catalogd::source::{HttpRegistryClient, RegistryClient};
use common::init_rustls;
use kube_runtime::controller::Action;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CATALOGS_PATH: &str = "/apis/catalogd.operatorframework.io/v1alpha1/catalogs";

#[derive(Debug)]
struct ApiState {
    object: Value,
    resource_version: u64,
    /// `status` or `metadata` per accepted patch, `conflict` per rejected one
    patches: Vec<&'static str>,
}

type SharedApi = Arc<Mutex<ApiState>>;

struct MockApiServer {
    state: SharedApi,
    url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for MockApiServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockApiServer {
    async fn start(object: Value) -> Self {
        let resource_version = object["metadata"]["resourceVersion"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        let state = Arc::new(Mutex::new(ApiState {
            object,
            resource_version,
            patches: Vec::new(),
        }));
        let app = Router::new()
            .route(&format!("{CATALOGS_PATH}/{{name}}"), patch(patch_object))
            .route(&format!("{CATALOGS_PATH}/{{name}}/status"), patch(patch_status))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { state, url, handle }
    }

    fn client(&self) -> kube::Client {
        init_rustls();
        let uri: Uri = self.url.parse().unwrap();
        kube::Client::try_from(kube::Config::new(uri)).unwrap()
    }

    fn patches(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().patches.clone()
    }

    fn object(&self) -> Value {
        self.state.lock().unwrap().object.clone()
    }
}

fn bump(state: &mut ApiState) {
    state.resource_version += 1;
    state.object["metadata"]["resourceVersion"] = json!(state.resource_version.to_string());
}

async fn patch_status(
    State(state): State<SharedApi>,
    Path(_name): Path<String>,
    body: Bytes,
) -> Json<Value> {
    let patch: Value = serde_json::from_slice(&body).unwrap();
    let mut state = state.lock().unwrap();
    state.object["status"] = patch["status"].clone();
    bump(&mut state);
    state.patches.push("status");
    Json(state.object.clone())
}

async fn patch_object(
    State(state): State<SharedApi>,
    Path(_name): Path<String>,
    body: Bytes,
) -> Response {
    let patch: Value = serde_json::from_slice(&body).unwrap();
    let mut state = state.lock().unwrap();
    if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
        if expected != state.resource_version.to_string() {
            state.patches.push("conflict");
            let status = json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": "the object has been modified; please apply your changes to the latest version and try again",
                "reason": "Conflict",
                "code": 409,
            });
            return (StatusCode::CONFLICT, Json(status)).into_response();
        }
    }
    state.object["metadata"]["finalizers"] = patch["metadata"]["finalizers"].clone();
    bump(&mut state);
    state.patches.push("metadata");
    Json(state.object.clone()).into_response()
}

fn catalog_json(finalizers: &[&str], deleting: bool, status: Option<Value>) -> Value {
    let mut object = json!({
        "apiVersion": "catalogd.operatorframework.io/v1alpha1",
        "kind": "Catalog",
        "metadata": {
            "name": "operatorhub",
            "resourceVersion": "7",
            "generation": 1,
            "finalizers": finalizers,
        },
        "spec": { "source": { "type": "image", "image": { "ref": "quay.io/operatorhubio/catalog:latest" } } },
    });
    if deleting {
        object["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
    }
    if let Some(status) = status {
        object["status"] = status;
    }
    object
}

fn reconciler(client: kube::Client, cache: &std::path::Path) -> Arc<Reconciler> {
    let registry: Arc<dyn RegistryClient> =
        Arc::new(HttpRegistryClient::new(Duration::from_secs(5)).unwrap());
    let image: Arc<dyn Unpacker> = Arc::new(ImageRegistry::new(cache.join("unpack"), registry));
    let pipeline = CatalogPipeline::new(
        Arc::new(SourceUnpacker::new().with_source(SourceType::Image, image)),
        Arc::new(LocalDir::new(cache.join("catalogs"), "http://localhost:8083/catalogs/")),
        Duration::from_secs(30),
    );
    Arc::new(Reconciler::new(client, pipeline))
}

#[tokio::test]
async fn test_deletion_releases_finalizer_in_one_pass() {
    let object = catalog_json(
        &["catalogd.operatorframework.io/delete-server-cache"],
        true,
        Some(json!({
            "phase": "Unpacked",
            "contentURL": "http://localhost:8083/catalogs/operatorhub/all.json",
            "conditions": [],
        })),
    );
    let server = MockApiServer::start(object.clone()).await;
    let cache = tempfile::tempdir().unwrap();
    let ctx = reconciler(server.client(), cache.path());
    ctx.backoff_states
        .lock()
        .unwrap()
        .insert("operatorhub".to_string(), BackoffState::new(5, 300));
    let catalog: Catalog = serde_json::from_value(object).unwrap();

    let action = reconcile(Arc::new(catalog), Arc::clone(&ctx)).await.unwrap();

    assert_eq!(action, Action::await_change());
    // Status first, then finalizers against the version the status write produced
    assert_eq!(server.patches(), vec!["status", "metadata"]);
    let stored = server.object();
    assert_eq!(stored["metadata"]["finalizers"], json!([]));
    assert_eq!(stored["status"]["phase"], "Deleting");
    assert_eq!(stored["status"]["contentURL"], Value::Null);
    assert!(!ctx.backoff_states.lock().unwrap().contains_key("operatorhub"));
}

#[tokio::test]
async fn test_finalizer_is_added_without_status_write() {
    let object = catalog_json(&[], false, None);
    let server = MockApiServer::start(object.clone()).await;
    let cache = tempfile::tempdir().unwrap();
    let ctx = reconciler(server.client(), cache.path());
    let catalog: Catalog = serde_json::from_value(object).unwrap();

    reconcile(Arc::new(catalog), ctx).await.unwrap();

    assert_eq!(server.patches(), vec!["metadata"]);
    assert_eq!(
        server.object()["metadata"]["finalizers"],
        json!(["catalogd.operatorframework.io/delete-server-cache"])
    );
}
