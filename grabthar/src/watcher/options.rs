//! Watcher configuration and collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ExternalCache;
use crate::config::{
    ConfigFile, DEFAULT_CLEAN_INTERVAL, DEFAULT_CLEAN_THRESHOLD, DEFAULT_INFO_CACHE_TTL,
    DEFAULT_LOCK_STALE_AFTER, DEFAULT_READ_CACHE_CAPACITY, DEFAULT_TAG,
};
use crate::http::{HttpTransport, ReqwestTransport, TransportError};
use crate::install::InstallOptions;
use crate::lock::LockService;
use crate::log::{Logger, NoOpLogger};
use crate::poll::{ErrorCallback, PollerConfig};
use crate::registry::{RegistryClient, RegistryOptions};

use super::error::WatchError;

/// What a [`Watcher`](super::Watcher) watches and how.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub name: String,
    /// Dist-tags to poll, one poller each.
    pub tags: Vec<String>,
    pub registry: RegistryOptions,
    pub poller: PollerConfig,
    /// Install the module's dependencies next to it.
    pub dependencies: bool,
    /// Restrict dependency installs to these names.
    pub child_modules: Option<Vec<String>>,
    /// Serve a locally installed copy when the live path fails.
    pub fallback: bool,
    /// Directory the fallback search starts from (None = current directory).
    pub fallback_root: Option<PathBuf>,
    /// Root of the live module tree (None = `~/__live_modules__`).
    pub live_modules_root: Option<PathBuf>,
    /// Periodically remove abandoned live module directories.
    pub cleanup: bool,
    pub clean_interval: Duration,
    pub clean_threshold: Duration,
    pub read_cache_capacity: usize,
    pub info_cache_ttl: Duration,
    pub lock_stale_after: Duration,
}

impl WatcherOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: vec![DEFAULT_TAG.to_string()],
            registry: RegistryOptions::default(),
            poller: PollerConfig::default(),
            dependencies: false,
            child_modules: None,
            fallback: true,
            fallback_root: None,
            live_modules_root: None,
            cleanup: true,
            clean_interval: DEFAULT_CLEAN_INTERVAL,
            clean_threshold: DEFAULT_CLEAN_THRESHOLD,
            read_cache_capacity: DEFAULT_READ_CACHE_CAPACITY,
            info_cache_ttl: DEFAULT_INFO_CACHE_TTL,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
        }
    }

    /// Options for `name` taken from a loaded config file.
    pub fn from_config(name: impl Into<String>, config: &ConfigFile) -> Self {
        let mut registry = RegistryOptions::new(config.registry.url.clone());
        if let Some(cdn) = &config.registry.cdn_url {
            registry = registry.with_cdn_registry(cdn.clone());
        }

        Self {
            tags: config.watcher.tags.clone(),
            registry,
            poller: PollerConfig::new(config.watcher.period)
                .with_max_interval(config.watcher.max_interval),
            dependencies: config.install.dependencies,
            child_modules: config.install.child_modules.clone(),
            fallback: config.watcher.fallback,
            live_modules_root: config.install.live_modules_dir.clone(),
            cleanup: config.install.cleanup,
            clean_interval: config.install.clean_interval,
            clean_threshold: config.install.clean_threshold,
            read_cache_capacity: config.watcher.read_cache_capacity,
            info_cache_ttl: config.registry.info_cache_ttl,
            lock_stale_after: config.install.lock_stale_after,
            ..Self::new(name)
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_registry(mut self, registry: RegistryOptions) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_dependencies(mut self, dependencies: bool) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_child_modules(mut self, child_modules: Vec<String>) -> Self {
        self.child_modules = Some(child_modules);
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_fallback_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fallback_root = Some(root.into());
        self
    }

    pub fn with_live_modules_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.live_modules_root = Some(root.into());
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_clean_interval(mut self, interval: Duration) -> Self {
        self.clean_interval = interval;
        self
    }

    pub fn with_clean_threshold(mut self, threshold: Duration) -> Self {
        self.clean_threshold = threshold;
        self
    }

    pub fn with_read_cache_capacity(mut self, capacity: usize) -> Self {
        self.read_cache_capacity = capacity;
        self
    }

    pub fn with_info_cache_ttl(mut self, ttl: Duration) -> Self {
        self.info_cache_ttl = ttl;
        self
    }

    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    pub(crate) fn install_options(&self) -> InstallOptions {
        let options =
            InstallOptions::new(self.registry.clone()).with_dependencies(self.dependencies);
        match &self.child_modules {
            Some(children) => options.with_child_modules(children.clone()),
            None => options,
        }
    }

    /// Whether the declared dependency `name` is installed and reported.
    pub(crate) fn includes_child(&self, name: &str) -> bool {
        self.dependencies
            && self
                .child_modules
                .as_ref()
                .map_or(true, |children| children.iter().any(|c| c == name))
    }
}

/// Collaborators a watcher runs against.
///
/// Only the transport is required. A registry client or lock service passed
/// here is shared with other watchers; otherwise each watcher builds its own.
#[derive(Clone)]
pub struct WatcherServices {
    pub transport: Arc<dyn HttpTransport>,
    pub cache: Option<Arc<dyn ExternalCache>>,
    pub logger: Arc<dyn Logger>,
    pub on_error: Option<ErrorCallback<WatchError>>,
    pub registry: Option<Arc<RegistryClient>>,
    pub locks: Option<Arc<LockService>>,
}

impl WatcherServices {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            cache: None,
            logger: Arc::new(NoOpLogger),
            on_error: None,
            registry: None,
            locks: None,
        }
    }

    /// Services backed by a [`ReqwestTransport`] with the given timeout.
    pub fn reqwest(timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self::new(Arc::new(ReqwestTransport::with_timeout(timeout)?)))
    }

    pub fn with_cache(mut self, cache: Arc<dyn ExternalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Called with the error of every failed poll cycle.
    pub fn with_on_error(mut self, on_error: ErrorCallback<WatchError>) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn with_registry_client(mut self, registry: Arc<RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_lock_service(mut self, locks: Arc<LockService>) -> Self {
        self.locks = Some(locks);
        self
    }
}
