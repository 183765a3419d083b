//! Default values and constants for every configurable setting.

use std::time::Duration;

use super::settings::*;

// =============================================================================
// Registry
// =============================================================================

/// Primary npm-compatible registry.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// File name served for each package by a CDN registry mirror.
pub const CDN_REGISTRY_INFO_FILENAME: &str = "info.json";

/// Width of the CDN cache-busting bucket. The `cache-bust` query parameter
/// changes once per window.
pub const CDN_CACHE_BUST_WINDOW: Duration = Duration::from_secs(60);

/// How long identical metadata requests share one fetch.
pub const DEFAULT_INFO_CACHE_TTL: Duration = Duration::from_secs(30);

/// Per-request HTTP timeout for registry and tarball downloads.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Prefix of every external cache key written by the registry client.
pub const INFO_CACHE_KEY_PREFIX: &str = "grabthar_npm_info";

// =============================================================================
// Watcher
// =============================================================================

/// Dist-tag watched when none is configured.
pub const DEFAULT_TAG: &str = "latest";

/// Interval between poll cycles.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(60);

/// Backoff multiplier applied after each failed cycle.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound for the backoff interval.
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Capacity of the watcher's file read cache.
pub const DEFAULT_READ_CACHE_CAPACITY: usize = 20;

// =============================================================================
// Install tree
// =============================================================================

/// Directory under the home directory holding every live module.
pub const LIVE_MODULES_DIR_NAME: &str = "__live_modules__";

/// Name of the directory holding installed packages inside a prefix.
pub const NODE_MODULES: &str = "node_modules";

/// Package manifest file name.
pub const PACKAGE_JSON: &str = "package.json";

/// Lock file name created inside a locked directory.
pub const LOCK_FILE_NAME: &str = "grabthar.lock";

/// Prefix of staging directories created during installs.
pub const STAGING_DIR_PREFIX: &str = ".grabthar_staging";

/// Interval between lock acquisition attempts.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Age after which a held lock is considered abandoned.
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

// =============================================================================
// Cleanup
// =============================================================================

/// Interval between stale directory sweeps.
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Age after which an unused live module directory is removed.
pub const DEFAULT_CLEAN_THRESHOLD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            registry: RegistrySettings {
                url: DEFAULT_REGISTRY.to_string(),
                cdn_url: None,
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                info_cache_ttl: DEFAULT_INFO_CACHE_TTL,
            },
            watcher: WatcherSettings {
                tags: vec![DEFAULT_TAG.to_string()],
                period: DEFAULT_POLL_PERIOD,
                max_interval: DEFAULT_MAX_POLL_INTERVAL,
                fallback: true,
                read_cache_capacity: DEFAULT_READ_CACHE_CAPACITY,
            },
            install: InstallSettings {
                live_modules_dir: None,
                dependencies: false,
                child_modules: None,
                cleanup: true,
                clean_interval: DEFAULT_CLEAN_INTERVAL,
                clean_threshold: DEFAULT_CLEAN_THRESHOLD,
                lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
            },
        }
    }
}
