//! # Local Directory Storage
//!
//! Stores each catalog as `<root>/<name>/all.json`: every file-based catalog
//! document of the unpacked content, one JSON object per line. Content is
//! written to a temp file in `<root>` and renamed into place.

use crate::constants::CONTENT_FILE_NAME;
use crate::fs::{clean_relative, ReadOnlyFs};
use crate::observability::metrics;
use crate::storage::fbc::walk_documents;
use crate::storage::Storage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::extract::{Path as UrlPath, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LocalDir {
    root_dir: PathBuf,
    base_url: String,
}

impl LocalDir {
    /// `base_url` is the externally reachable URL the handler is mounted at
    pub fn new(root_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            root_dir: root_dir.into(),
            base_url,
        }
    }

    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[async_trait]
impl Storage for LocalDir {
    async fn store(&self, name: &str, fs: Arc<dyn ReadOnlyFs>) -> Result<()> {
        let root = self.root_dir.clone();
        let name = name.to_string();
        let result = tokio::task::spawn_blocking(move || write_catalog(&root, &name, fs.as_ref()))
            .await
            .context("store task failed")
            .and_then(|r| r);
        metrics::increment_storage_operations("store", outcome(&result));
        result
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.root_dir.join(name);
        let result = match tokio::fs::remove_dir_all(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(anyhow!(e).context(format!("removing {}", path.display())))
            }
            _ => Ok(()),
        };
        metrics::increment_storage_operations("delete", outcome(&result));
        if result.is_ok() {
            debug!(catalog = name, "deleted stored catalog content");
        }
        result
    }

    fn content_url(&self, name: &str) -> String {
        format!("{}{name}/{CONTENT_FILE_NAME}", self.base_url)
    }

    fn storage_server_handler(&self) -> Router {
        Router::new()
            .route("/{*path}", get(serve_file))
            .layer(middleware::from_fn(track_request_duration))
            .with_state(Arc::new(self.root_dir.clone()))
    }
}

fn outcome<T>(result: &Result<T>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "failure"
    }
}

fn write_catalog(root: &Path, name: &str, fs: &dyn ReadOnlyFs) -> Result<()> {
    std::fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
    let temp = NamedTempFile::new_in(root)
        .with_context(|| format!("creating temp file in {}", root.display()))?;

    let mut documents = 0usize;
    {
        let mut writer = BufWriter::new(temp.as_file());
        walk_documents(fs, |_, document| {
            serde_json::to_writer(&mut writer, &document)?;
            writer.write_all(b"\n")?;
            documents += 1;
            Ok(())
        })?;
        writer.flush().context("flushing catalog content")?;
    }

    let catalog_dir = root.join(name);
    std::fs::create_dir_all(&catalog_dir)
        .with_context(|| format!("creating {}", catalog_dir.display()))?;
    let target = catalog_dir.join(CONTENT_FILE_NAME);
    temp.persist(&target)
        .map_err(|e| anyhow!(e.error).context(format!("writing {}", target.display())))?;

    info!(catalog = name, documents, path = %target.display(), "stored catalog content");
    Ok(())
}

async fn serve_file(State(root): State<Arc<PathBuf>>, UrlPath(path): UrlPath<String>) -> Response {
    let Ok(relative) = clean_relative(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    // Hidden entries are in-flight temp files
    let hidden = relative.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    });
    if hidden || relative.as_os_str().is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let full = root.join(&relative);
    match tokio::fs::metadata(&full).await {
        Ok(meta) if meta.is_file() => {}
        _ => return StatusCode::NOT_FOUND.into_response(),
    }

    match tokio::fs::read(&full).await {
        Ok(body) => {
            let content_type = if full.extension().is_some_and(|ext| ext == "json") {
                "application/json"
            } else {
                "application/octet-stream"
            };
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            debug!(path = %full.display(), error = %e, "failed to read stored content");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn track_request_duration(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    metrics::observe_http_request_duration(
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
