//! # Catalog Sources
//!
//! Resolves a catalog's source descriptor to an immutable digest and a
//! read-only filesystem of its content, caching extracted content on disk.
//!
//! ## Module Structure
//!
//! - `reference.rs` - Image reference parsing
//! - `registry.rs` - OCI distribution client
//! - `extract.rs` - Layer extraction with whiteout handling
//! - `image_registry.rs` - Unpacker for `image` sources

pub mod extract;
pub mod image_registry;
pub mod reference;
pub mod registry;

pub use image_registry::ImageRegistry;
pub use reference::ImageReference;
pub use registry::{HttpRegistryClient, Layer, PulledImage, RegistryClient};

use crate::crd::{Catalog, CatalogSource, SourceType};
use crate::errors::UnpackError;
use crate::fs::ReadOnlyFs;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;

/// Progress reported by an unpacker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackState {
    /// Waiting for the unpack to start
    Pending,
    /// Unpack is in progress
    Unpacking,
    /// Content is available; `resolved_source` and `fs` are set
    Unpacked,
}

/// Result of a single unpack call
#[derive(Debug, Clone)]
pub struct UnpackResult {
    pub state: UnpackState,
    /// Digest-pinned source, set once unpacked
    pub resolved_source: Option<CatalogSource>,
    /// Extracted content, set once unpacked
    pub fs: Option<Arc<dyn ReadOnlyFs>>,
    /// Human-readable progress or failure detail
    pub message: String,
}

impl UnpackResult {
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            state: UnpackState::Pending,
            resolved_source: None,
            fs: None,
            message: message.into(),
        }
    }

    pub fn unpacking(message: impl Into<String>) -> Self {
        Self {
            state: UnpackState::Unpacking,
            resolved_source: None,
            fs: None,
            message: message.into(),
        }
    }

    pub fn unpacked(
        resolved_source: CatalogSource,
        fs: Arc<dyn ReadOnlyFs>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            state: UnpackState::Unpacked,
            resolved_source: Some(resolved_source),
            fs: Some(fs),
            message: message.into(),
        }
    }
}

/// Turns a catalog's source into extracted content
#[async_trait]
pub trait Unpacker: Send + Sync + std::fmt::Debug {
    /// Resolve and extract the catalog's source
    async fn unpack(&self, catalog: &Catalog) -> Result<UnpackResult, UnpackError>;

    /// Remove all cached state for the catalog
    async fn cleanup(&self, catalog: &Catalog) -> Result<(), UnpackError>;
}

/// Dispatches to the unpacker registered for the catalog's source type
#[derive(Debug, Clone, Default)]
pub struct SourceUnpacker {
    sources: HashMap<SourceType, Arc<dyn Unpacker>>,
}

impl SourceUnpacker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the unpacker for a source type
    #[must_use]
    pub fn with_source(mut self, source_type: SourceType, unpacker: Arc<dyn Unpacker>) -> Self {
        self.sources.insert(source_type, unpacker);
        self
    }

    fn unpacker_for(&self, catalog: &Catalog) -> Result<&Arc<dyn Unpacker>, UnpackError> {
        let raw = &catalog.spec.source.source_type;
        let source_type: SourceType = raw.parse().map_err(|e: anyhow::Error| {
            UnpackError::unrecoverable(e.context(format!(
                "catalog {} has an unsupported source",
                catalog.name_any()
            )))
        })?;
        self.sources.get(&source_type).ok_or_else(|| {
            UnpackError::unrecoverable_msg(format!(
                "source type {source_type:?} is not registered"
            ))
        })
    }
}

#[async_trait]
impl Unpacker for SourceUnpacker {
    async fn unpack(&self, catalog: &Catalog) -> Result<UnpackResult, UnpackError> {
        self.unpacker_for(catalog)?.unpack(catalog).await
    }

    async fn cleanup(&self, catalog: &Catalog) -> Result<(), UnpackError> {
        match self.unpacker_for(catalog) {
            Ok(unpacker) => unpacker.cleanup(catalog).await,
            // The source type may have been edited; clear whatever any source cached
            Err(_) => {
                for unpacker in self.sources.values() {
                    unpacker.cleanup(catalog).await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingUnpacker {
        unpacks: AtomicUsize,
        cleanups: AtomicUsize,
    }

    #[async_trait]
    impl Unpacker for CountingUnpacker {
        async fn unpack(&self, _catalog: &Catalog) -> Result<UnpackResult, UnpackError> {
            self.unpacks.fetch_add(1, Ordering::SeqCst);
            Ok(UnpackResult::pending("queued"))
        }

        async fn cleanup(&self, _catalog: &Catalog) -> Result<(), UnpackError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn catalog(source_type: &str) -> Catalog {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "catalogd.operatorframework.io/v1alpha1",
            "kind": "Catalog",
            "metadata": { "name": "test" },
            "spec": { "source": { "type": source_type } }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatches_by_source_type() {
        let image = Arc::new(CountingUnpacker::default());
        let unpacker = SourceUnpacker::new()
            .with_source(SourceType::Image, Arc::clone(&image) as Arc<dyn Unpacker>);

        let result = unpacker.unpack(&catalog("image")).await.unwrap();
        assert_eq!(result.state, UnpackState::Pending);
        assert_eq!(image.unpacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_source_type_is_unrecoverable() {
        let unpacker = SourceUnpacker::new()
            .with_source(SourceType::Image, Arc::new(CountingUnpacker::default()));
        let err = unpacker.unpack(&catalog("git")).await.unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[tokio::test]
    async fn test_unregistered_source_type_is_unrecoverable() {
        let err = SourceUnpacker::new()
            .unpack(&catalog("image"))
            .await
            .unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[tokio::test]
    async fn test_cleanup_with_unknown_type_clears_every_source() {
        let image = Arc::new(CountingUnpacker::default());
        let unpacker = SourceUnpacker::new()
            .with_source(SourceType::Image, Arc::clone(&image) as Arc<dyn Unpacker>);

        unpacker.cleanup(&catalog("git")).await.unwrap();
        assert_eq!(image.cleanups.load(Ordering::SeqCst), 1);
    }
}
