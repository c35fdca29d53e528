//! # Watch Loop
//!
//! Runs the Kubernetes controller over all `Catalog` resources until
//! shutdown, restarting the watch if its stream ends unexpectedly.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::{shutdown_requested, ServerState, ShutdownSignal};
use crate::crd::Catalog;
use crate::runtime::error_policy::handle_reconciliation_error;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Watch-loop settings taken from `ControllerConfig`
#[derive(Debug, Clone, Copy)]
pub struct WatchLoopConfig {
    pub max_concurrent_reconciles: u16,
    pub restart_delay: Duration,
}

/// Run the controller watch loop
///
/// The server is marked ready while the controller runs and not ready once
/// shutdown begins.
pub async fn run_watch_loop(
    catalogs: Api<Catalog>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    shutdown: ShutdownSignal,
    config: WatchLoopConfig,
) {
    loop {
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        info!(parent: &watch_span, "Starting controller watch loop...");
        server_state.set_ready(true);

        Controller::new(catalogs.clone(), watcher::Config::default().any_semantic())
            .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
            .graceful_shutdown_on(shutdown.clone())
            .run(
                reconcile,
                handle_reconciliation_error,
                Arc::clone(&reconciler),
            )
            .for_each(|result| {
                match result {
                    Ok((object, action)) => {
                        debug!(catalog = %object.name, action = ?action, "watch.event.reconciled");
                    }
                    // Reconcile failures are already logged by the error policy
                    Err(controller::Error::ReconcilerFailed(..)) => {}
                    Err(e) => {
                        warn!(error = %e, "watch.event.error");
                    }
                }
                futures::future::ready(())
            })
            .await;

        if shutdown_requested(&shutdown) {
            server_state.set_ready(false);
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            config.restart_delay.as_secs()
        );
        tokio::time::sleep(config.restart_delay).await;
    }

    info!("Controller stopped gracefully");
}
