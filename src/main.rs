//! # catalogd
//!
//! A Kubernetes controller that unpacks file-based catalog images into a
//! local cache and serves their content over HTTP.
//!
//! ## Overview
//!
//! For every cluster-scoped `Catalog` resource the controller:
//!
//! 1. **Resolves the source** - Turns the image reference into an immutable digest
//! 2. **Unpacks once per digest** - Extracts the labelled catalog directory into `<cache-dir>/unpack/<name>/<digest>`
//! 3. **Stores and serves** - Writes the catalog as JSON lines and serves it under `/catalogs/<name>/all.json`
//! 4. **Cleans up** - Removes served and cached content before a deleted catalog goes away
//!
//! Configuration comes from environment variables, overridden by flags
//! (`catalogd --help`).

use anyhow::{Context, Result};
use catalogd::config::{Args, ControllerConfig};
use catalogd::constants::CATALOG_SERVER_SHUTDOWN_TIMEOUT_SECS;
use catalogd::runtime::initialization::initialize;
use catalogd::runtime::watch_loop::{run_watch_loop, WatchLoopConfig};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.version {
        println!(
            "catalogd {} (git {}, built {})",
            env!("CARGO_PKG_VERSION"),
            env!("BUILD_GIT_HASH"),
            env!("BUILD_DATETIME")
        );
        return Ok(());
    }

    let mut config = ControllerConfig::from_env();
    args.apply(&mut config);

    let init = initialize(&config).await?;

    run_watch_loop(
        init.catalogs,
        init.reconciler,
        init.server_state,
        init.shutdown,
        WatchLoopConfig {
            max_concurrent_reconciles: config.max_concurrent_reconciles,
            restart_delay: config.watch_restart_delay(),
        },
    )
    .await;

    let drain = futures::future::join_all(init.server_handles);
    let results = match tokio::time::timeout(
        Duration::from_secs(CATALOG_SERVER_SHUTDOWN_TIMEOUT_SECS),
        drain,
    )
    .await
    {
        Ok(results) => results,
        Err(_) => {
            warn!(
                "HTTP servers did not stop within {}s",
                CATALOG_SERVER_SHUTDOWN_TIMEOUT_SECS
            );
            Vec::new()
        }
    };
    for result in results {
        result.context("HTTP server task panicked")??;
    }

    info!("catalogd stopped");
    Ok(())
}
