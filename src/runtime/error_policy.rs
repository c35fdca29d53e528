//! # Error Policy
//!
//! Decides when a failed reconciliation is retried.
//!
//! - Unrecoverable failures wait for the catalog to change; retrying would
//!   reproduce them until the spec is edited.
//! - Everything else is requeued with per-catalog exponential backoff, reset
//!   by the next successful reconciliation.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::Catalog;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback delay when the backoff table is unavailable (seconds)
const FALLBACK_RETRY_SECS: u64 = 60;

pub fn handle_reconciliation_error(
    obj: Arc<Catalog>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        catalog = %name,
        error = %error
    );
    let _error_guard = error_span.enter();

    observability::increment_reconciliation_errors(error.kind());

    if error.is_unrecoverable() {
        error!("Unrecoverable failure for catalog {}, waiting for a spec change", name);
        return Action::await_change();
    }

    let (backoff_seconds, error_count) = next_retry_delay(
        &ctx.backoff_states,
        &name,
        ctx.backoff_base_secs,
        ctx.backoff_max_secs,
    );

    info!(
        "Retrying catalog {} in {}s (error count: {})",
        name, backoff_seconds, error_count
    );
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Advance the backoff for `key`, returning the delay and the error count
pub(crate) fn next_retry_delay(
    states: &Mutex<HashMap<String, BackoffState>>,
    key: &str,
    base_seconds: u64,
    max_seconds: u64,
) -> (u64, u32) {
    match states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(key.to_string())
                .or_insert_with(|| BackoffState::new(base_seconds, max_seconds));
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (FALLBACK_RETRY_SECS, 0)
        }
    }
}
