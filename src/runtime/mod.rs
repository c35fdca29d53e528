//! # Runtime
//!
//! Process bootstrap and the controller watch loop.
//!
//! - `initialization.rs` - Tracing, metrics, cache directories, servers, startup sweep
//! - `watch_loop.rs` - `kube_runtime::Controller` over all `Catalog` resources
//! - `error_policy.rs` - Requeue policy for failed reconciliations

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
