//! # Controller
//!
//! Core controller modules for catalogd.
//!
//! - `backoff`: Exponential backoff for failed reconciliations
//! - `reconciler`: Catalog lifecycle state machine and Kubernetes entry point
//! - `server`: HTTP servers for catalog content, metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
