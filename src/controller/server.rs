//! # HTTP Servers
//!
//! Three listeners run beside the controller:
//!
//! - Metrics server (`METRICS_BIND_ADDRESS`): `/metrics`, Prometheus text format
//! - Health probe server (`HEALTH_PROBE_BIND_ADDRESS`):
//!   - `/healthz` - Liveness probe (always returns 200)
//!   - `/readyz` - Readiness probe (200 once the controller is running)
//! - Catalog server (`CATALOGS_SERVER_ADDR`): stored catalog content under `/catalogs`

use crate::constants::{CATALOG_SERVER_READ_TIMEOUT_SECS, STORAGE_DIR};
use crate::observability::metrics::REGISTRY;
use crate::storage::Storage;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use futures::future::{BoxFuture, FutureExt, Shared};
use prometheus::{Encoder, TextEncoder};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Default)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
}

impl ServerState {
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::Relaxed)
    }
}

/// Router for Prometheus metrics
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Router for liveness and readiness probes
pub fn probe_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Router serving stored catalog content under `/catalogs`
pub fn catalog_router(storage: &dyn Storage) -> Router {
    Router::new()
        .nest(&format!("/{STORAGE_DIR}"), storage.storage_server_handler())
        .layer(TimeoutLayer::new(Duration::from_secs(
            CATALOG_SERVER_READ_TIMEOUT_SECS,
        )))
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener for the `name` server
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(name: &'static str, addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {name} server to {addr}"))?;
    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

/// Serve `app` on `listener` until `shutdown` resolves
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    name: &'static str,
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .with_context(|| format!("{name} server failed"))?;

    info!("{} server stopped", name);
    Ok(())
}

/// Cloneable shutdown notification shared by the servers and the controller
pub type ShutdownSignal = Shared<BoxFuture<'static, ()>>;

/// Build the process-wide shutdown notification, fired by SIGINT, SIGTERM
/// or `stop`
pub fn shutdown_handle(stop: impl Future<Output = ()> + Send + 'static) -> ShutdownSignal {
    async move {
        tokio::select! {
            () = shutdown_signal() => {},
            () = stop => info!("Shutting down after a server stopped"),
        }
    }
    .boxed()
    .shared()
}

/// Whether the shutdown notification has fired
#[must_use]
pub fn shutdown_requested(shutdown: &ShutdownSignal) -> bool {
    shutdown.peek().is_some()
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
