//! # Layer Extraction
//!
//! Applies image layers in order onto a staging directory, keeping only the
//! entries below the catalog content directory named by the image label.

use crate::errors::UnpackError;
use crate::source::registry::Layer;
use anyhow::{anyhow, Context};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

const MEDIA_TYPE_OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
const MEDIA_TYPE_OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
const MEDIA_TYPE_DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Extract `config_dir` from `layers` into `dest`.
///
/// `dest` must exist. Entries outside `config_dir` are ignored; paths below it
/// are re-rooted at `dest`.
pub fn extract_layers(layers: &[Layer], config_dir: &str, dest: &Path) -> Result<(), UnpackError> {
    let prefix = normalize(config_dir).map_err(UnpackError::unrecoverable)?;

    for layer in layers {
        debug!(layer = %layer.digest, media_type = %layer.media_type, "applying layer");
        let reader: Box<dyn Read + '_> = match layer.media_type.as_str() {
            MEDIA_TYPE_OCI_LAYER => Box::new(layer.data.as_slice()),
            MEDIA_TYPE_OCI_LAYER_GZIP | MEDIA_TYPE_DOCKER_LAYER_GZIP => {
                Box::new(GzDecoder::new(layer.data.as_slice()))
            }
            other => {
                return Err(UnpackError::unrecoverable_msg(format!(
                    "layer {} has unsupported media type {other:?}",
                    layer.digest
                )));
            }
        };
        apply_layer(reader, &prefix, dest)
            .with_context(|| format!("extracting layer {}", layer.digest))
            .map_err(classify)?;
    }
    Ok(())
}

/// Path escapes are a property of the image and will not go away on retry
#[derive(Debug, thiserror::Error)]
#[error("entry {0:?} escapes the extraction root")]
struct PathEscape(String);

fn classify(err: anyhow::Error) -> UnpackError {
    if err.chain().any(|cause| cause.is::<PathEscape>()) {
        UnpackError::Unrecoverable(err)
    } else {
        UnpackError::Recoverable(err)
    }
}

fn apply_layer(reader: impl Read, prefix: &Path, dest: &Path) -> anyhow::Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(false);

    for entry in archive.entries().context("reading layer archive")? {
        let mut entry = entry.context("reading layer entry")?;
        let raw_path = entry.path().context("decoding entry path")?.into_owned();
        let path = normalize(&raw_path.to_string_lossy())?;

        let Ok(relative) = path.strip_prefix(prefix) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_parent = relative.parent().unwrap_or_else(|| Path::new(""));
        ensure_no_symlink_ancestors(dest, relative_parent, &raw_path)?;
        let parent = dest.join(relative_parent);

        if file_name == OPAQUE_WHITEOUT {
            clear_dir(&parent)?;
            continue;
        }
        if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            remove_path(&parent.join(hidden))?;
            continue;
        }

        let target = dest.join(relative);
        match entry.header().entry_type() {
            EntryType::Directory => {
                if target.is_file() || target.is_symlink() {
                    remove_path(&target)?;
                }
                std::fs::create_dir_all(&target)
                    .with_context(|| format!("creating {}", target.display()))?;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::Symlink => {
                std::fs::create_dir_all(&parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
                remove_path(&target)?;
                entry
                    .unpack(&target)
                    .with_context(|| format!("writing {}", target.display()))?;
            }
            other => {
                debug!(path = %relative.display(), entry_type = ?other, "skipping unsupported entry type");
            }
        }
    }
    Ok(())
}

/// Fail if any directory between `dest` and `dest/relative_parent` is a
/// symlink, which would let later writes land outside `dest`
fn ensure_no_symlink_ancestors(
    dest: &Path,
    relative_parent: &Path,
    entry: &Path,
) -> anyhow::Result<()> {
    let mut current = dest.to_path_buf();
    for component in relative_parent.components() {
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(anyhow!(PathEscape(entry.display().to_string())));
            }
            Ok(_) => {}
            // Nothing further down can exist yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(anyhow!(e).context(format!("inspecting {}", current.display()))),
        }
    }
    Ok(())
}

/// Strip leading `/` and `./`, reject `..`
fn normalize(path: &str) -> anyhow::Result<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(anyhow!(PathEscape(path.to_string())));
            }
        }
    }
    Ok(cleaned)
}

fn remove_path(path: &Path) -> anyhow::Result<()> {
    crate::fs::remove_path(path).with_context(|| format!("removing {}", path.display()))
}

fn clear_dir(dir: &Path) -> anyhow::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(anyhow!(e).context(format!("reading {}", dir.display()))),
    };
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        remove_path(&entry.path())?;
    }
    Ok(())
}
