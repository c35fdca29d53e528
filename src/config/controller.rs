//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{STORAGE_DIR, UNPACK_CACHE_DIR};
use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Directory holding the unpack cache and stored catalogs
    pub cache_dir: PathBuf,
    /// Bind address of the catalog content server
    pub catalogs_server_addr: String,
    /// External address at which the catalog content server is reachable
    pub http_external_address: String,
    /// Bind address of the Prometheus metrics server
    pub metrics_bind_address: String,
    /// Bind address of the liveness and readiness endpoints
    pub health_probe_bind_address: String,
    /// Deadline for a single source unpack (seconds)
    pub unpack_timeout_secs: u64,
    /// Periodic requeue of successfully reconciled catalogs (seconds).
    /// Unset means catalogs are only revisited on change.
    pub resync_interval_secs: Option<u64>,
    /// Maximum number of catalogs reconciled at once
    pub max_concurrent_reconciles: u16,
    /// Exponential backoff starting value (seconds)
    pub backoff_base_secs: u64,
    /// Exponential backoff maximum value (seconds)
    pub backoff_max_secs: u64,
    /// Watch stream restart delay after it ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            catalogs_server_addr: DEFAULT_CATALOGS_SERVER_ADDR.to_string(),
            http_external_address: DEFAULT_HTTP_EXTERNAL_ADDRESS.to_string(),
            metrics_bind_address: DEFAULT_METRICS_BIND_ADDRESS.to_string(),
            health_probe_bind_address: DEFAULT_HEALTH_PROBE_BIND_ADDRESS.to_string(),
            unpack_timeout_secs: DEFAULT_UNPACK_TIMEOUT_SECS,
            resync_interval_secs: None,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            cache_dir: var("CACHE_DIR").map_or(defaults.cache_dir, PathBuf::from),
            catalogs_server_addr: var("CATALOGS_SERVER_ADDR")
                .unwrap_or(defaults.catalogs_server_addr),
            http_external_address: var("HTTP_EXTERNAL_ADDRESS")
                .unwrap_or(defaults.http_external_address),
            metrics_bind_address: var("METRICS_BIND_ADDRESS")
                .unwrap_or(defaults.metrics_bind_address),
            health_probe_bind_address: var("HEALTH_PROBE_BIND_ADDRESS")
                .unwrap_or(defaults.health_probe_bind_address),
            unpack_timeout_secs: parse_or_default(
                var("UNPACK_TIMEOUT_SECS"),
                defaults.unpack_timeout_secs,
            ),
            resync_interval_secs: var("RESYNC_INTERVAL_SECS").and_then(|v| v.parse().ok()),
            max_concurrent_reconciles: parse_or_default(
                var("MAX_CONCURRENT_RECONCILES"),
                defaults.max_concurrent_reconciles,
            ),
            backoff_base_secs: parse_or_default(
                var("BACKOFF_BASE_SECS"),
                defaults.backoff_base_secs,
            ),
            backoff_max_secs: parse_or_default(var("BACKOFF_MAX_SECS"), defaults.backoff_max_secs),
            watch_restart_delay_secs: parse_or_default(
                var("WATCH_RESTART_DELAY_SECS"),
                defaults.watch_restart_delay_secs,
            ),
            log_format: var("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    /// Root of the unpack cache, `<cache-dir>/unpack`
    #[must_use]
    pub fn unpack_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(UNPACK_CACHE_DIR)
    }

    /// Root of stored catalog content, `<cache-dir>/catalogs`
    #[must_use]
    pub fn storage_dir(&self) -> PathBuf {
        self.cache_dir.join(STORAGE_DIR)
    }

    /// URL prefix of served catalog content, `<external-address>/catalogs/`
    #[must_use]
    pub fn base_storage_url(&self) -> String {
        format!(
            "{}/{STORAGE_DIR}/",
            self.http_external_address.trim_end_matches('/')
        )
    }

    #[must_use]
    pub fn unpack_timeout(&self) -> Duration {
        Duration::from_secs(self.unpack_timeout_secs)
    }

    #[must_use]
    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Parse a value or fall back to the default
fn parse_or_default<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
