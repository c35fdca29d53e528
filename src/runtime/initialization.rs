//! # Initialization
//!
//! Controller bootstrap: rustls setup, tracing, metrics, cache directories,
//! HTTP servers, Kubernetes client and the startup garbage collection sweep.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{CatalogPipeline, Reconciler};
use crate::controller::server::{
    bind, catalog_router, metrics_router, probe_router, serve, shutdown_handle, ServerState,
    ShutdownSignal,
};
use crate::crd::{Catalog, SourceType};
use crate::fs::create_private_dir;
use crate::garbage_collection::{GarbageCollector, LiveCatalogs};
use crate::observability;
use crate::source::{HttpRegistryClient, ImageRegistry, RegistryClient, SourceUnpacker, Unpacker};
use crate::storage::{LocalDir, Storage};
use anyhow::{Context, Result};
use kube::{api::Api, Client};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Everything the watch loop needs, produced by [`initialize`]
pub struct InitializationResult {
    /// API for all `Catalog` resources
    pub catalogs: Api<Catalog>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Fires on SIGINT/SIGTERM or when an HTTP server stops on its own
    pub shutdown: ShutdownSignal,
    /// Metrics, probe and catalog server tasks
    pub server_handles: Vec<JoinHandle<Result<()>>>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Set up the tracing subscriber
///
/// `RUST_LOG` selects the filter (default `catalogd=info`); `json` selects
/// the JSON formatter.
pub fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "catalogd=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - Tracing subscriber setup
/// - rustls crypto provider setup
/// - Metrics registration
/// - Cache and storage directories
/// - Metrics, probe and catalog server startup
/// - Kubernetes client creation
/// - Startup garbage collection of orphaned cache entries
///
/// # Errors
///
/// Fails if a directory cannot be created, a server address cannot be bound, the
/// cluster is unreachable or the garbage collection sweep cannot list
/// catalogs or read the cache.
pub async fn initialize(config: &ControllerConfig) -> Result<InitializationResult> {
    init_tracing(&config.log_format);

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting catalogd v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::register_metrics()?;

    let unpack_dir = config.unpack_cache_dir();
    let storage_dir = config.storage_dir();
    for dir in [&unpack_dir, &storage_dir] {
        create_private_dir(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    let registry_client: Arc<dyn RegistryClient> =
        Arc::new(HttpRegistryClient::new(config.unpack_timeout())?);
    let image_registry: Arc<dyn Unpacker> =
        Arc::new(ImageRegistry::new(&unpack_dir, registry_client));
    let unpacker: Arc<dyn Unpacker> =
        Arc::new(SourceUnpacker::new().with_source(SourceType::Image, image_registry));
    let storage: Arc<dyn Storage> =
        Arc::new(LocalDir::new(&storage_dir, config.base_storage_url()));

    let metrics_listener = bind("metrics", &config.metrics_bind_address).await?;
    let probe_listener = bind("probe", &config.health_probe_bind_address).await?;
    let catalog_listener = bind("catalog", &config.catalogs_server_addr).await?;

    let server_state = Arc::new(ServerState::default());
    let server_stopped = Arc::new(Notify::new());
    let shutdown = shutdown_handle({
        let server_stopped = Arc::clone(&server_stopped);
        async move { server_stopped.notified().await }
    });
    let server_handles = vec![
        spawn_server(
            "metrics",
            metrics_listener,
            metrics_router(),
            shutdown.clone(),
            Arc::clone(&server_stopped),
        ),
        spawn_server(
            "probe",
            probe_listener,
            probe_router(Arc::clone(&server_state)),
            shutdown.clone(),
            Arc::clone(&server_stopped),
        ),
        spawn_server(
            "catalog",
            catalog_listener,
            catalog_router(storage.as_ref()),
            shutdown.clone(),
            Arc::clone(&server_stopped),
        ),
    ];

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let catalogs: Api<Catalog> = Api::all(client.clone());

    // Must finish before any reconcile starts writing to the cache
    let live: Arc<dyn LiveCatalogs> = Arc::new(catalogs.clone());
    let removed = GarbageCollector::new(&unpack_dir, live)
        .sweep()
        .await
        .context("Garbage collection of the unpack cache failed")?;
    info!("Garbage collection removed {} cache entries", removed.len());

    let pipeline = CatalogPipeline::new(unpacker, storage, config.unpack_timeout());
    let reconciler = Arc::new(
        Reconciler::new(client, pipeline)
            .with_backoff(config.backoff_base_secs, config.backoff_max_secs)
            .with_resync_interval(config.resync_interval()),
    );

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        catalogs,
        reconciler,
        server_state,
        shutdown,
        server_handles,
    })
}

/// Run a server until shutdown; an early exit triggers shutdown of the rest
fn spawn_server(
    name: &'static str,
    listener: TcpListener,
    app: axum::Router,
    shutdown: ShutdownSignal,
    server_stopped: Arc<Notify>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let result = serve(name, listener, app, shutdown).await;
        if let Err(e) = &result {
            error!("{} server error: {:#}", name, e);
            server_stopped.notify_one();
        }
        result
    })
}
