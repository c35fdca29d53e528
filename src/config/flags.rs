//! # Command-Line Flags
//!
//! Flags take precedence over environment variables.

use crate::config::ControllerConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "catalogd", about = "Unpacks and serves file-based catalog content")]
pub struct Args {
    /// The directory in the filesystem that catalogd will use for file based caching
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// The address where the unpacked catalogs' content will be accessible
    #[arg(long)]
    pub catalogs_server_addr: Option<String>,

    /// The external address at which the http server is reachable
    #[arg(long)]
    pub http_external_address: Option<String>,

    /// The address the metric endpoint binds to
    #[arg(long)]
    pub metrics_bind_address: Option<String>,

    /// The address the probe endpoint binds to
    #[arg(long)]
    pub health_probe_bind_address: Option<String>,

    /// Deadline for unpacking a single catalog source, in seconds
    #[arg(long)]
    pub unpack_timeout_secs: Option<u64>,

    /// Requeue successfully unpacked catalogs after this many seconds
    #[arg(long)]
    pub resync_interval_secs: Option<u64>,

    /// Maximum number of catalogs reconciled concurrently
    #[arg(long)]
    pub max_concurrent_reconciles: Option<u16>,

    /// Print the catalogd version and exit
    #[arg(long)]
    pub version: bool,
}

impl Args {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut ControllerConfig) {
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir.clone_from(cache_dir);
        }
        if let Some(addr) = &self.catalogs_server_addr {
            config.catalogs_server_addr.clone_from(addr);
        }
        if let Some(addr) = &self.http_external_address {
            config.http_external_address.clone_from(addr);
        }
        if let Some(addr) = &self.metrics_bind_address {
            config.metrics_bind_address.clone_from(addr);
        }
        if let Some(addr) = &self.health_probe_bind_address {
            config.health_probe_bind_address.clone_from(addr);
        }
        if let Some(secs) = self.unpack_timeout_secs {
            config.unpack_timeout_secs = secs;
        }
        if let Some(secs) = self.resync_interval_secs {
            config.resync_interval_secs = Some(secs);
        }
        if let Some(max) = self.max_concurrent_reconciles {
            config.max_concurrent_reconciles = max;
        }
    }
}
