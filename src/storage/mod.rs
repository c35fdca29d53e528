//! # Content Storage
//!
//! Persists unpacked catalog content for serving and answers where it can be
//! fetched from.
//!
//! - `local_dir.rs` - Store backed by a local directory
//! - `fbc.rs` - File-based catalog document walking

pub mod fbc;
pub mod local_dir;

pub use local_dir::LocalDir;

use crate::fs::ReadOnlyFs;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Persist `fs` under `name`, atomically replacing any previous content
    async fn store(&self, name: &str, fs: Arc<dyn ReadOnlyFs>) -> Result<()>;

    /// Remove everything stored for `name`. Unknown names are not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// URL at which content for `name` is served once stored
    fn content_url(&self, name: &str) -> String;

    /// Router serving stored content, to be nested under the content URL prefix
    fn storage_server_handler(&self) -> axum::Router;
}
