//! # Types
//!
//! Core types for the reconciler.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::reconciler::state::CatalogPipeline;
use crate::errors::UnpackError;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("source unpack failed: {0}")]
    Unpack(#[from] UnpackError),
    #[error("source cleanup failed: {0}")]
    Cleanup(#[source] UnpackError),
    #[error("storing catalog content failed: {0:#}")]
    Storage(#[source] anyhow::Error),
    #[error("deleting stored catalog content failed: {0:#}")]
    StorageDelete(#[source] anyhow::Error),
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

impl ReconcilerError {
    /// Retrying will reproduce the failure until the catalog spec changes
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unpack(e) if e.is_unrecoverable())
    }

    /// Metric label for this error
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.is_unrecoverable() {
            "unrecoverable"
        } else {
            "recoverable"
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(base_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: ExponentialBackoff::new(base_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context handed to every reconcile and error-policy call
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub pipeline: CatalogPipeline,
    // Backoff state per catalog name, owned by the error policy and reset on success
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Requeue after success; `None` waits for the next change
    pub resync_interval: Option<Duration>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("pipeline", &self.pipeline)
            .field("resync_interval", &self.resync_interval)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, pipeline: CatalogPipeline) -> Self {
        Self {
            client,
            pipeline,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            backoff_base_secs: crate::constants::DEFAULT_BACKOFF_BASE_SECS,
            backoff_max_secs: crate::constants::DEFAULT_BACKOFF_MAX_SECS,
            resync_interval: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, base_secs: u64, max_secs: u64) -> Self {
        self.backoff_base_secs = base_secs;
        self.backoff_max_secs = max_secs;
        self
    }

    #[must_use]
    pub fn with_resync_interval(mut self, interval: Option<Duration>) -> Self {
        self.resync_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_classification() {
        let err = ReconcilerError::from(UnpackError::unrecoverable_msg("missing image source"));
        assert!(err.is_unrecoverable());
        assert_eq!(err.kind(), "unrecoverable");

        let err = ReconcilerError::from(UnpackError::from(anyhow::anyhow!("registry 503")));
        assert!(!err.is_unrecoverable());

        // Storage and cleanup failures are always retried
        let err = ReconcilerError::Storage(anyhow::anyhow!("disk full"));
        assert!(!err.is_unrecoverable());
        let err = ReconcilerError::Cleanup(UnpackError::unrecoverable_msg("odd"));
        assert!(!err.is_unrecoverable());
        assert_eq!(err.kind(), "recoverable");
    }

    #[test]
    fn test_backoff_state_reset() {
        let mut state = BackoffState::new(5, 300);
        state.increment_error();
        assert_eq!(state.backoff.next_backoff_seconds(), 5);
        assert_eq!(state.backoff.next_backoff_seconds(), 10);
        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.backoff.next_backoff_seconds(), 5);
    }
}
