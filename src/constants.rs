//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the `Catalog` resource
pub const API_GROUP: &str = "catalogd.operatorframework.io";

/// Finalizer that blocks `Catalog` deletion until served content and cache are removed
pub const FBC_DELETION_FINALIZER: &str = "catalogd.operatorframework.io/delete-server-cache";

/// Image config label naming the in-image directory holding file-based catalog content
pub const CONFIG_DIR_LABEL: &str = "operators.operatorframework.io.index.configs.v1";

/// Field manager used for patches issued by the controller
pub const FIELD_MANAGER: &str = "catalogd";

/// Subdirectory of the cache dir holding unpacked image content
pub const UNPACK_CACHE_DIR: &str = "unpack";

/// Subdirectory of the cache dir holding stored catalog content
pub const STORAGE_DIR: &str = "catalogs";

/// Name of the file-based catalog document served for each catalog
pub const CONTENT_FILE_NAME: &str = "all.json";

/// Default cache directory
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/";

/// Default bind address of the catalog content server
pub const DEFAULT_CATALOGS_SERVER_ADDR: &str = "0.0.0.0:8083";

/// Default external address at which the catalog content server is reachable
pub const DEFAULT_HTTP_EXTERNAL_ADDRESS: &str = "http://catalogd-catalogserver.catalogd-system.svc";

/// Default bind address of the metrics server
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default bind address of the health probe server
pub const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default deadline for a single source resolve (seconds)
pub const DEFAULT_UNPACK_TIMEOUT_SECS: u64 = 300;

/// Default maximum number of catalogs reconciled concurrently
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 10;

/// Exponential backoff base for reconciliation errors (seconds)
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;

/// Exponential backoff cap for reconciliation errors (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Catalog server read timeout (seconds)
pub const CATALOG_SERVER_READ_TIMEOUT_SECS: u64 = 5;

/// Catalog server graceful shutdown timeout (seconds)
pub const CATALOG_SERVER_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Delay before restarting the watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
