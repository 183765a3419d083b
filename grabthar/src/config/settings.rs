//! Settings structs backing `config.ini`.

use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration loaded from `~/.grabthar/config.ini`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub registry: RegistrySettings,
    pub watcher: WatcherSettings,
    pub install: InstallSettings,
}

/// `[registry]` section.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Primary registry base URL.
    pub url: String,
    /// Optional CDN mirror base URL, tried before the primary registry.
    pub cdn_url: Option<String>,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
    /// How long identical metadata requests share one result.
    pub info_cache_ttl: Duration,
}

/// `[watcher]` section.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Dist-tags to poll.
    pub tags: Vec<String>,
    /// Base interval between poll cycles.
    pub period: Duration,
    /// Cap on the backoff interval.
    pub max_interval: Duration,
    /// Serve a locally installed copy when the live path fails.
    pub fallback: bool,
    /// Capacity of the file read cache.
    pub read_cache_capacity: usize,
}

/// `[install]` section.
#[derive(Debug, Clone)]
pub struct InstallSettings {
    /// Root of the live module tree (None = `~/__live_modules__`).
    pub live_modules_dir: Option<PathBuf>,
    /// Install each version's dependencies next to it.
    pub dependencies: bool,
    /// Only install these dependencies (None = all).
    pub child_modules: Option<Vec<String>>,
    /// Run the stale directory sweeper.
    pub cleanup: bool,
    pub clean_interval: Duration,
    pub clean_threshold: Duration,
    /// Age after which a held install lock is reclaimed.
    pub lock_stale_after: Duration,
}
