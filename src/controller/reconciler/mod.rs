//! # Reconciler
//!
//! Reconciliation logic for `Catalog` resources.
//!
//! The reconciler:
//! - Ensures the deletion finalizer is present before any content is cached
//! - Unpacks the catalog source through the registered unpacker
//! - Stores the unpacked content and publishes its URL in status
//! - Removes served and cached content when the catalog is deleted
//!
//! ## Module Structure
//!
//! - `types.rs` - `Reconciler` context, `ReconcilerError`, per-resource backoff
//! - `state.rs` - The lifecycle state machine (no Kubernetes API access)
//! - `reconcile.rs` - Kubernetes entry point and status/finalizer patches

pub mod reconcile;
pub mod state;
pub mod types;

pub use reconcile::reconcile;
pub use state::CatalogPipeline;
pub use types::{BackoffState, Reconciler, ReconcilerError};
