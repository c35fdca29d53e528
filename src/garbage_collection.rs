//! # Startup Garbage Collection
//!
//! Removes unpack cache entries whose catalog no longer exists. Runs once,
//! before the controller starts, so it never races a reconcile.

use crate::crd::Catalog;
use crate::observability::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::ListParams;
use kube::Api;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Source of the names of catalogs that currently exist
#[async_trait]
pub trait LiveCatalogs: Send + Sync {
    async fn catalog_names(&self) -> Result<HashSet<String>>;
}

#[async_trait]
impl LiveCatalogs for Api<Catalog> {
    async fn catalog_names(&self) -> Result<HashSet<String>> {
        let catalogs = self
            .list_metadata(&ListParams::default())
            .await
            .context("listing catalogs")?;
        Ok(catalogs
            .items
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect())
    }
}

/// Removes a single cache root entry
type RemoveEntry = fn(&Path) -> std::io::Result<()>;

pub struct GarbageCollector {
    cache_root: PathBuf,
    catalogs: Arc<dyn LiveCatalogs>,
    remove_entry: RemoveEntry,
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("cache_root", &self.cache_root)
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    pub fn new(cache_root: impl Into<PathBuf>, catalogs: Arc<dyn LiveCatalogs>) -> Self {
        Self {
            cache_root: cache_root.into(),
            catalogs,
            remove_entry: crate::fs::remove_path,
        }
    }

    #[cfg(test)]
    fn with_remove_entry(mut self, remove_entry: RemoveEntry) -> Self {
        self.remove_entry = remove_entry;
        self
    }

    /// Delete every cache root entry that is not a directory named after a
    /// live catalog. Returns the names of removed entries.
    ///
    /// Failing to list catalogs or read the cache root aborts the sweep.
    /// Failing to remove a single entry is logged and the sweep continues.
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let live = self.catalogs.catalog_names().await?;

        let mut entries = tokio::fs::read_dir(&self.cache_root)
            .await
            .with_context(|| format!("reading cache directory {}", self.cache_root.display()))?;

        let mut removed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("reading cache directory {}", self.cache_root.display()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if is_dir && live.contains(&name) {
                continue;
            }

            let path = entry.path();
            let remove_entry = self.remove_entry;
            let result = tokio::task::spawn_blocking(move || remove_entry(&path)).await;
            match result {
                Ok(Ok(())) => {
                    info!(path = %name, is_dir, "deleted unexpected cache directory entry");
                    metrics::increment_garbage_collected_entries();
                    removed.push(name);
                }
                Ok(Err(e)) => {
                    error!(path = %name, is_dir, error = %e, "error removing cache directory entry");
                }
                Err(e) => {
                    error!(path = %name, is_dir, error = %e, "cache entry removal task failed");
                }
            }
        }

        removed.sort();
        Ok(removed)
    }
}
