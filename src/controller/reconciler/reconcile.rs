//! # Reconcile
//!
//! Kubernetes entry point: runs the state machine over a copy of the
//! delivered `Catalog` and persists what changed.

use crate::constants::{FBC_DELETION_FINALIZER, FIELD_MANAGER};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{Catalog, CatalogStatus};
use crate::observability;
use anyhow::Context;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span, Instrument};

/// Reconcile a single `Catalog`.
///
/// Status is written before the state machine's error (if any) is returned,
/// so a failure is visible on the resource even if the process exits right
/// after.
///
/// # Errors
///
/// Returns the state machine's failure, or the API error from persisting
/// status or finalizers.
pub async fn reconcile(
    catalog: Arc<Catalog>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = catalog.name_any();
    let span = info_span!(
        "catalog.reconcile",
        catalog = %name,
        generation = catalog.metadata.generation.unwrap_or_default(),
    );

    async move {
        let start = Instant::now();
        observability::increment_reconciliations();

        let mut updated = (*catalog).clone();
        let result = ctx.pipeline.reconcile_catalog(&mut updated).await;

        let api: Api<Catalog> = Api::all(ctx.client.clone());
        persist_changes(&api, &catalog, &updated).await?;

        observability::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                if is_released(&updated) {
                    forget_backoff(&ctx, &name);
                } else {
                    reset_backoff(&ctx, &name);
                }
                let action = next_action(ctx.resync_interval);
                debug!(action = ?action, "reconciled");
                Ok(action)
            }
            Err(e) => {
                error!(error = %e, unrecoverable = e.is_unrecoverable(), "reconciliation failed");
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Patch status, then finalizers, for whichever changed.
///
/// The finalizer patch is guarded by the resourceVersion of the object the
/// status patch returned, since that write bumped it.
async fn persist_changes(
    api: &Api<Catalog>,
    original: &Catalog,
    updated: &Catalog,
) -> Result<(), ReconcilerError> {
    let name = updated.name_any();
    let mut resource_version = updated.metadata.resource_version.clone();

    if updated.status != original.status {
        if let Some(status) = &updated.status {
            let patched = api
                .patch_status(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(status_patch(status)?),
                )
                .await
                .with_context(|| format!("Failed to update status of catalog {name}"))?;
            resource_version = patched.metadata.resource_version;
        }
    }

    if updated.finalizers() != original.finalizers() {
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(finalizers_patch(updated, resource_version)),
        )
        .await
        .with_context(|| format!("Failed to update finalizers of catalog {name}"))?;
    }

    Ok(())
}

/// Merge patch replacing the whole status.
///
/// Unset optional fields are sent as `null` so a merge patch clears them
/// instead of leaving stale values behind.
fn status_patch(status: &CatalogStatus) -> anyhow::Result<Value> {
    let mut value = serde_json::to_value(status).context("Failed to serialize catalog status")?;
    if let Value::Object(fields) = &mut value {
        for key in ["phase", "contentURL", "resolvedSource", "observedGeneration"] {
            fields.entry(key).or_insert(Value::Null);
        }
    }
    Ok(json!({ "status": value }))
}

/// Merge patch replacing the finalizer list, guarded by `resource_version`
fn finalizers_patch(catalog: &Catalog, resource_version: Option<String>) -> Value {
    json!({
        "metadata": {
            "finalizers": catalog.finalizers(),
            "resourceVersion": resource_version,
        }
    })
}

fn next_action(resync_interval: Option<Duration>) -> Action {
    match resync_interval {
        Some(interval) => Action::requeue(interval),
        None => Action::await_change(),
    }
}

/// Deletion finished and the catalog is about to disappear
fn is_released(catalog: &Catalog) -> bool {
    catalog.metadata.deletion_timestamp.is_some()
        && !catalog.finalizers().iter().any(|f| f == FBC_DELETION_FINALIZER)
}

fn forget_backoff(ctx: &Reconciler, name: &str) {
    if let Ok(mut states) = ctx.backoff_states.lock() {
        states.remove(name);
    }
}

fn reset_backoff(ctx: &Reconciler, name: &str) {
    if let Ok(mut states) = ctx.backoff_states.lock() {
        if let Some(state) = states.get_mut(name) {
            if state.error_count > 0 {
                debug!(error_count = state.error_count, "resetting backoff after success");
            }
            state.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CatalogPhase, CatalogSource};

    #[test]
    fn test_status_patch_clears_unset_fields() {
        let status = CatalogStatus {
            phase: Some(CatalogPhase::Failing),
            ..Default::default()
        };
        let patch = status_patch(&status).unwrap();

        assert_eq!(patch["status"]["phase"], "Failing");
        assert_eq!(patch["status"]["contentURL"], Value::Null);
        assert_eq!(patch["status"]["resolvedSource"], Value::Null);
        assert_eq!(patch["status"]["conditions"], json!([]));
    }

    #[test]
    fn test_status_patch_keeps_set_fields() {
        let status = CatalogStatus {
            phase: Some(CatalogPhase::Unpacked),
            content_url: Some("http://catalogd/catalogs/operatorhub/all.json".to_string()),
            resolved_source: Some(CatalogSource::image("quay.io/operatorhub/catalog@sha256:ab")),
            observed_generation: Some(2),
            ..Default::default()
        };
        let patch = status_patch(&status).unwrap();

        assert_eq!(
            patch["status"]["contentURL"],
            "http://catalogd/catalogs/operatorhub/all.json"
        );
        assert_eq!(
            patch["status"]["resolvedSource"]["image"]["ref"],
            "quay.io/operatorhub/catalog@sha256:ab"
        );
        assert_eq!(patch["status"]["observedGeneration"], 2);
    }

    #[test]
    fn test_finalizers_patch_uses_given_resource_version() {
        let catalog: Catalog = serde_json::from_value(json!({
            "apiVersion": "catalogd.operatorframework.io/v1alpha1",
            "kind": "Catalog",
            "metadata": { "name": "operatorhub", "resourceVersion": "42" },
            "spec": { "source": { "type": "image", "image": { "ref": "quay.io/operatorhub/catalog:latest" } } },
        }))
        .unwrap();

        let patch = finalizers_patch(&catalog, Some("43".to_string()));
        assert_eq!(patch["metadata"]["finalizers"], json!([]));
        assert_eq!(patch["metadata"]["resourceVersion"], "43");
    }

    #[test]
    fn test_next_action() {
        assert_eq!(next_action(None), Action::await_change());
        assert_eq!(
            next_action(Some(Duration::from_secs(600))),
            Action::requeue(Duration::from_secs(600))
        );
    }
}
