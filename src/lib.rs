//! catalogd Library
//!
//! This library provides the core functionality of the catalogd controller:
//! resolving catalog sources, caching their content, storing and serving it,
//! and reconciling `Catalog` resources.
//!
//! ## Quick Start
//!
//! ```rust
//! use catalogd::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod errors;
pub mod fs;
pub mod garbage_collection;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod source;
pub mod storage;
