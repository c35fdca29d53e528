//! # Image Registry Unpacker
//!
//! Unpacks `image` sources into `<base>/<catalog>/<digestHex>`.
//!
//! Extraction is staged in `<digestHex>.tmp-*` next to the final entry and
//! published with a rename, so readers never see a partial entry and a
//! concurrent unpack of the same digest that loses the rename is still a
//! success. Every successful resolve, cache hits included, removes entries
//! for other digests of the same catalog.

use crate::constants::CONFIG_DIR_LABEL;
use crate::crd::{Catalog, CatalogSource};
use crate::errors::UnpackError;
use crate::fs::DiskFs;
use crate::observability::metrics;
use crate::source::extract::extract_layers;
use crate::source::reference::{digest_hex, validate_digest, ImageReference};
use crate::source::registry::RegistryClient;
use crate::source::{UnpackResult, Unpacker};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use kube::ResourceExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct ImageRegistry {
    base_cache_path: PathBuf,
    client: Arc<dyn RegistryClient>,
}

impl ImageRegistry {
    pub fn new(base_cache_path: impl Into<PathBuf>, client: Arc<dyn RegistryClient>) -> Self {
        Self {
            base_cache_path: base_cache_path.into(),
            client,
        }
    }

    async fn unpack_image(
        &self,
        name: &str,
        reference: &ImageReference,
    ) -> Result<UnpackResult, UnpackError> {
        let digest = self.client.resolve_digest(reference).await?;
        // The digest names a cache directory, so only the strict form is accepted
        validate_digest(&digest)
            .with_context(|| format!("registry resolved {reference} to an unusable digest"))?;
        let hex = digest_hex(&digest).to_string();
        let catalog_dir = self.base_cache_path.join(name);
        let unpack_path = catalog_dir.join(&hex);
        let resolved = CatalogSource::image(reference.pinned(&digest));

        if tokio::fs::metadata(&unpack_path)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            debug!(digest = %digest, "using cached catalog content");
            metrics::increment_unpack_cache_hits();
            prune_stale_entries(&unpack_path).await;
            return Ok(unpacked(resolved, unpack_path));
        }

        let image = self.client.pull(reference, &digest).await?;
        let Some(config_dir) = image.labels.get(CONFIG_DIR_LABEL).cloned() else {
            return Err(UnpackError::unrecoverable_msg(format!(
                "catalog image {} is missing the required label {CONFIG_DIR_LABEL:?}",
                reference.pinned(&digest)
            )));
        };

        tokio::fs::create_dir_all(&catalog_dir)
            .await
            .with_context(|| format!("creating cache directory {}", catalog_dir.display()))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{hex}.tmp-"))
            .tempdir_in(&catalog_dir)
            .with_context(|| format!("creating staging directory in {}", catalog_dir.display()))?;

        // The staging handle moves into the blocking task so it is removed on
        // any failure there, including when this future is dropped first
        let target = unpack_path.clone();
        tokio::task::spawn_blocking(move || {
            extract_layers(&image.layers, &config_dir, staging.path())?;
            publish(staging, &target)
        })
        .await
        .context("unpack task failed")??;
        prune_stale_entries(&unpack_path).await;

        info!(digest = %digest, path = %unpack_path.display(), "unpacked catalog image");
        Ok(unpacked(resolved, unpack_path))
    }
}

#[async_trait]
impl Unpacker for ImageRegistry {
    async fn unpack(&self, catalog: &Catalog) -> Result<UnpackResult, UnpackError> {
        let name = catalog.name_any();
        let Some(image) = catalog.spec.source.image.as_ref() else {
            return Err(UnpackError::unrecoverable_msg(format!(
                "error parsing catalog {name}: catalog source image is nil"
            )));
        };
        let reference = ImageReference::parse(&image.reference).map_err(|e| {
            UnpackError::unrecoverable(
                e.context(format!("error parsing image reference for catalog {name}")),
            )
        })?;

        let span = info_span!("source.unpack", catalog = %name, image = %image.reference);
        let result = self.unpack_image(&name, &reference).instrument(span).await;
        metrics::increment_unpacks(if result.is_ok() { "success" } else { "failure" });
        result
    }

    async fn cleanup(&self, catalog: &Catalog) -> Result<(), UnpackError> {
        let path = self.base_cache_path.join(catalog.name_any());
        match tokio::fs::remove_dir_all(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(anyhow!(e)
                .context(format!("removing cache directory {}", path.display()))
                .into()),
            _ => Ok(()),
        }
    }
}

fn unpacked(resolved: CatalogSource, path: PathBuf) -> UnpackResult {
    let message = format!(
        "successfully unpacked the catalog image {:?}",
        resolved
            .image
            .as_ref()
            .map(|i| i.reference.as_str())
            .unwrap_or_default()
    );
    UnpackResult::unpacked(resolved, Arc::new(DiskFs::new(path)), message)
}

/// Rename the staging directory into place. If the target already exists a
/// concurrent unpack published the same digest first and its entry is kept.
fn publish(staging: TempDir, target: &Path) -> Result<(), UnpackError> {
    match std::fs::rename(staging.path(), target) {
        // Nothing is left at the staging path for the handle to remove
        Ok(()) => Ok(()),
        Err(_) if target.is_dir() => {
            debug!(path = %target.display(), "content already published by a concurrent unpack");
            Ok(())
        }
        Err(e) => Err(anyhow!(e)
            .context(format!("publishing {}", target.display()))
            .into()),
    }
}

/// Remove entries superseded by `current`. The current entry is already
/// published, so a failure here is logged and retried on the next resolve.
async fn prune_stale_entries(current: &Path) {
    let target = current.to_path_buf();
    let result = tokio::task::spawn_blocking(move || prune_siblings(&target))
        .await
        .context("prune task failed")
        .and_then(|r| r.map_err(anyhow::Error::from));
    if let Err(e) = result {
        warn!(error = %e, path = %current.display(), "failed to remove superseded cache entries");
    }
}

/// Remove every entry beside `current` except in-flight staging dirs for it
fn prune_siblings(current: &Path) -> Result<(), UnpackError> {
    let (Some(parent), Some(current_name)) = (current.parent(), current.file_name()) else {
        return Ok(());
    };
    let current_name = current_name.to_string_lossy();
    let staging_prefix = format!("{current_name}.tmp-");

    let entries = std::fs::read_dir(parent)
        .with_context(|| format!("reading cache directory {}", parent.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("reading cache directory {}", parent.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == current_name || name.starts_with(&staging_prefix) {
            continue;
        }
        debug!(path = %entry.path().display(), "removing superseded cache entry");
        crate::fs::remove_path(&entry.path())
            .with_context(|| format!("removing {}", entry.path().display()))?;
    }
    Ok(())
}
