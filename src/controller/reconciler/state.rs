//! # Catalog State Machine
//!
//! One pass of the catalog lifecycle, applied to an in-memory copy of the
//! resource. The caller persists whatever changed (status, finalizers).
//!
//! ```text
//! Pending -> Unpacking -> Unpacked | Failing
//! Failing -> (retry) -> Unpacking
//! any     -> Deleting -> (finalizer removed)
//! ```
//!
//! Adding the finalizer and unpacking never happen in the same pass, so the
//! finalizer is persisted before any cache content exists.

use crate::constants::FBC_DELETION_FINALIZER;
use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::{
    Catalog, CatalogPhase, CatalogSource, CatalogStatus, Condition, ConditionStatus,
    REASON_STORAGE_DELETE_FAILED, REASON_STORAGE_FAILED, REASON_UNPACKING,
    REASON_UNPACK_FAILED, REASON_UNPACK_PENDING, REASON_UNPACK_SUCCESSFUL, TYPE_DELETE,
    TYPE_UNPACKED,
};
use crate::errors::UnpackError;
use crate::source::{UnpackState, Unpacker};
use crate::storage::Storage;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collaborators driven by the state machine
#[derive(Debug, Clone)]
pub struct CatalogPipeline {
    unpacker: Arc<dyn Unpacker>,
    storage: Arc<dyn Storage>,
    unpack_timeout: Duration,
}

impl CatalogPipeline {
    #[must_use]
    pub fn new(
        unpacker: Arc<dyn Unpacker>,
        storage: Arc<dyn Storage>,
        unpack_timeout: Duration,
    ) -> Self {
        Self {
            unpacker,
            storage,
            unpack_timeout,
        }
    }

    /// Run one reconciliation pass over `catalog`, mutating its status and
    /// finalizers in place.
    ///
    /// Status is updated before any error is returned.
    ///
    /// # Errors
    ///
    /// Returns the unpack, storage or cleanup failure that left the catalog
    /// in `Failing` (or kept its finalizer during deletion).
    pub async fn reconcile_catalog(&self, catalog: &mut Catalog) -> Result<(), ReconcilerError> {
        if catalog.metadata.deletion_timestamp.is_some() {
            return self.finalize(catalog).await;
        }

        if !has_finalizer(catalog) {
            debug!(catalog = %catalog.name_any(), "adding deletion finalizer");
            catalog
                .finalizers_mut()
                .push(FBC_DELETION_FINALIZER.to_string());
            return Ok(());
        }

        let result = self.unpack(catalog).await;
        let name = catalog.name_any();
        let generation = catalog.metadata.generation;
        let status = catalog.status.get_or_insert_with(CatalogStatus::default);
        status.observed_generation = generation;

        let unpacked = match result {
            Err(e) => {
                warn!(catalog = %name, unrecoverable = e.is_unrecoverable(), error = %e, "unpack failed");
                set_failing(status, REASON_UNPACK_FAILED, e.to_string(), generation);
                return Err(e.into());
            }
            Ok(unpacked) => unpacked,
        };

        match unpacked.state {
            UnpackState::Pending => {
                set_progressing(
                    status,
                    CatalogPhase::Pending,
                    REASON_UNPACK_PENDING,
                    unpacked.message,
                    generation,
                );
                Ok(())
            }
            UnpackState::Unpacking => {
                set_progressing(
                    status,
                    CatalogPhase::Unpacking,
                    REASON_UNPACKING,
                    unpacked.message,
                    generation,
                );
                Ok(())
            }
            UnpackState::Unpacked => {
                let Some(fs) = unpacked.fs else {
                    let err = UnpackError::Recoverable(anyhow::anyhow!(
                        "source reported unpacked without any content"
                    ));
                    set_failing(status, REASON_UNPACK_FAILED, err.to_string(), generation);
                    return Err(err.into());
                };

                if let Err(e) = self.storage.store(&name, fs).await {
                    warn!(catalog = %name, error = %format!("{e:#}"), "storing catalog content failed");
                    set_failing(status, REASON_STORAGE_FAILED, format!("{e:#}"), generation);
                    return Err(ReconcilerError::Storage(e));
                }

                let content_url = self.storage.content_url(&name);
                info!(catalog = %name, content_url = %content_url, "catalog unpacked");
                set_unpacked(
                    status,
                    content_url,
                    unpacked.resolved_source,
                    unpacked.message,
                    generation,
                );
                Ok(())
            }
        }
    }

    /// Unpack under the configured deadline; expiry is transient
    async fn unpack(&self, catalog: &Catalog) -> Result<crate::source::UnpackResult, UnpackError> {
        match tokio::time::timeout(self.unpack_timeout, self.unpacker.unpack(catalog)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(UnpackError::Recoverable(anyhow::anyhow!(
                "unpack did not finish within {:?}",
                self.unpack_timeout
            ))),
        }
    }

    /// Deletion protocol: remove served content, then cached content, then
    /// release the finalizer.
    async fn finalize(&self, catalog: &mut Catalog) -> Result<(), ReconcilerError> {
        if !has_finalizer(catalog) {
            return Ok(());
        }

        let name = catalog.name_any();
        info!(catalog = %name, "cleaning up deleted catalog");

        let result = match self.storage.delete(&name).await {
            Err(e) => Err(ReconcilerError::StorageDelete(e)),
            Ok(()) => self
                .unpacker
                .cleanup(catalog)
                .await
                .map_err(ReconcilerError::Cleanup),
        };

        let generation = catalog.metadata.generation;
        let status = catalog.status.get_or_insert_with(CatalogStatus::default);
        status.phase = Some(CatalogPhase::Deleting);
        status.content_url = None;

        if let Err(e) = result {
            warn!(catalog = %name, error = %e, "catalog cleanup failed, keeping finalizer");
            let mut condition = Condition::new(
                TYPE_DELETE,
                ConditionStatus::False,
                REASON_STORAGE_DELETE_FAILED,
                e.to_string(),
            );
            condition.observed_generation = generation;
            status.set_condition(condition);
            return Err(e);
        }

        catalog
            .finalizers_mut()
            .retain(|f| f != FBC_DELETION_FINALIZER);
        debug!(catalog = %name, "deletion finalizer removed");
        Ok(())
    }
}

fn has_finalizer(catalog: &Catalog) -> bool {
    catalog
        .finalizers()
        .iter()
        .any(|f| f == FBC_DELETION_FINALIZER)
}

fn unpacked_condition(
    status: ConditionStatus,
    reason: &str,
    message: String,
    generation: Option<i64>,
) -> Condition {
    let mut condition = Condition::new(TYPE_UNPACKED, status, reason, message);
    condition.observed_generation = generation;
    condition
}

fn set_progressing(
    status: &mut CatalogStatus,
    phase: CatalogPhase,
    reason: &str,
    message: String,
    generation: Option<i64>,
) {
    status.phase = Some(phase);
    status.content_url = None;
    status.resolved_source = None;
    status.set_condition(unpacked_condition(
        ConditionStatus::False,
        reason,
        message,
        generation,
    ));
}

fn set_failing(status: &mut CatalogStatus, reason: &str, message: String, generation: Option<i64>) {
    set_progressing(status, CatalogPhase::Failing, reason, message, generation);
}

fn set_unpacked(
    status: &mut CatalogStatus,
    content_url: String,
    resolved_source: Option<CatalogSource>,
    message: String,
    generation: Option<i64>,
) {
    status.phase = Some(CatalogPhase::Unpacked);
    status.content_url = Some(content_url);
    status.resolved_source = resolved_source;
    status.set_condition(unpacked_condition(
        ConditionStatus::True,
        REASON_UNPACK_SUCCESSFUL,
        message,
        generation,
    ));
}
