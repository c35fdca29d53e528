//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use catalogd::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (`Catalog`, `CatalogStatus`, etc.)
//! - The unpacker and storage traits with their built-in implementations
//! - Reconciler types (`Reconciler`, `ReconcilerError`, `CatalogPipeline`)
//! - `ControllerConfig` and the error classification

// CRD types - most commonly used
pub use crate::crd::*;

// Source and storage seams
pub use crate::fs::{DiskFs, MemoryFs, ReadOnlyFs};
pub use crate::source::{ImageRegistry, SourceUnpacker, UnpackResult, UnpackState, Unpacker};
pub use crate::storage::{LocalDir, Storage};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, BackoffState, CatalogPipeline, Reconciler, ReconcilerError,
};

pub use crate::config::ControllerConfig;
pub use crate::errors::UnpackError;
