//! # Custom Resource Definitions
//!
//! CRD types for the catalog controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `Catalog` specification and source descriptors
//! - `status.rs` - Status, phase and condition types

mod spec;
mod status;

// Re-export all public types
pub use spec::{Catalog, CatalogSource, CatalogSpec, ImageSource, SourceType};
pub use status::{
    CatalogPhase, CatalogStatus, Condition, ConditionStatus, REASON_STORAGE_DELETE_FAILED,
    REASON_STORAGE_FAILED, REASON_UNPACKING, REASON_UNPACK_FAILED, REASON_UNPACK_PENDING,
    REASON_UNPACK_SUCCESSFUL, TYPE_DELETE, TYPE_UNPACKED,
};
