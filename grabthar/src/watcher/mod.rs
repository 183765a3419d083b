//! Live module watcher.
//!
//! A [`Watcher`] keeps one [`Poller`] per watched dist-tag. Each poll cycle
//! runs the whole pipeline:
//!
//! ```text
//! RegistryClient::fetch_info ─► resolve ─► Installer::install ─► ModuleDetails
//!                                  ▲
//!                    StabilityMap ─┘  (mark_stable / mark_unstable)
//! ```
//!
//! Callers read the last good [`ModuleDetails`] through [`Watcher::get`],
//! or go one step further with [`Watcher::import`] and [`Watcher::read`].
//! When no cycle has succeeded yet, a copy installed under the fallback root
//! (`node_modules/{name}`) stands in for the live module.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use grabthar::watcher::{JsonLoader, Watcher, WatcherOptions, WatcherServices};
//!
//! let services = WatcherServices::reqwest(Duration::from_secs(30))?;
//! let watcher = Watcher::start(WatcherOptions::new("my-module"), services);
//!
//! let details = watcher.get(None).await?;
//! println!("live: {} (rollback: {})", details.version, details.previous_version);
//!
//! let config = watcher.import(&JsonLoader, Some("config.json"), None).await?;
//! ```

mod details;
mod error;
mod fallback;
mod loader;
mod options;

pub use details::{DependencyDetails, ModuleDetails, PackageManifest};
pub use error::{FallbackError, LoadError, WatchError, WatcherError};
pub use fallback::discover;
pub use loader::{
    contained_path, import_candidates, resolve_entry, BytesLoader, DylibLoader, JsonLoader,
    ModuleLoader,
};
pub use options::{WatcherOptions, WatcherServices};

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use crate::cache::BoxFuture;
use crate::cleanup::DirectorySweeper;
use crate::config::DEFAULT_TAG;
use crate::install::{InstallOptions, Installer};
use crate::lock::LockService;
use crate::log::Logger;
use crate::paths::{default_live_modules_root, live_modules_dir, module_prefix};
use crate::poll::{ErrorCallback, PollHandler, Poller};
use crate::registry::RegistryClient;
use crate::resolve::{resolve, StabilityMap};
use crate::{log_error, log_info, log_warn};

type TagPoller = Poller<Arc<ModuleDetails>, WatchError>;

/// Keeps the live version of one package installed and hands it out.
///
/// Dropping the watcher stops its pollers and sweeper.
pub struct Watcher {
    name: String,
    tags: Vec<String>,
    pollers: Vec<TagPoller>,
    stability: StabilityMap,
    fallback: Option<PathBuf>,
    sweeper: Option<Arc<DirectorySweeper>>,
    read_cache: Mutex<LruCache<PathBuf, Arc<String>>>,
    logger: Arc<dyn Logger>,
}

impl Watcher {
    /// Build the pipeline and start polling every tag.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(options: WatcherOptions, services: WatcherServices) -> Self {
        let logger = Arc::clone(&services.logger);

        let registry = services.registry.clone().unwrap_or_else(|| {
            let client = RegistryClient::new(Arc::clone(&services.transport))
                .with_logger(Arc::clone(&logger))
                .with_info_cache_ttl(options.info_cache_ttl);
            let client = match &services.cache {
                Some(cache) => client.with_cache(Arc::clone(cache)),
                None => client,
            };
            Arc::new(client)
        });
        let locks = services.locks.clone().unwrap_or_else(|| {
            Arc::new(
                LockService::new(Arc::clone(&logger)).with_stale_after(options.lock_stale_after),
            )
        });
        let installer = Installer::new(Arc::clone(&registry), locks, Arc::clone(&logger));

        let root = options
            .live_modules_root
            .clone()
            .unwrap_or_else(default_live_modules_root);
        let live_dir = live_modules_dir(&root, options.registry.cdn_registry.as_deref());

        let sweeper = options.cleanup.then(|| {
            Arc::new(DirectorySweeper::start(
                live_dir.clone(),
                options.clean_interval,
                options.clean_threshold,
                Arc::clone(&logger),
            ))
        });

        let tags = if options.tags.is_empty() {
            vec![DEFAULT_TAG.to_string()]
        } else {
            options.tags.clone()
        };

        let stability = StabilityMap::new();
        let on_error = poll_error_hook(&options.name, &logger, services.on_error.clone());

        let pollers = tags
            .iter()
            .map(|tag| {
                let cycle = Arc::new(Cycle {
                    name: options.name.clone(),
                    tag: tag.clone(),
                    registry: Arc::clone(&registry),
                    installer: installer.clone(),
                    install_options: options.install_options(),
                    stability: stability.clone(),
                    live_dir: live_dir.clone(),
                    options: options.clone(),
                    sweeper: sweeper.clone(),
                    logger: Arc::clone(&logger),
                    last_version: Mutex::new(None),
                });
                let handler: PollHandler<Arc<ModuleDetails>, WatchError> =
                    Arc::new(move || -> BoxFuture<'static, _> {
                        let cycle = Arc::clone(&cycle);
                        Box::pin(async move { cycle.run().await })
                    });
                let poller = Poller::new(options.poller, handler)
                    .with_on_error(on_error(tag.as_str()));
                poller.start();
                poller
            })
            .collect();

        let fallback = options.fallback.then(|| {
            options
                .fallback_root
                .clone()
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from("."))
        });
        let capacity =
            NonZeroUsize::new(options.read_cache_capacity).unwrap_or(NonZeroUsize::MIN);

        debug!(
            name = %options.name,
            tags = ?tags,
            live_dir = %live_dir.display(),
            "Watcher started"
        );

        Self {
            name: options.name,
            tags,
            pollers,
            stability,
            fallback,
            sweeper,
            read_cache: Mutex::new(LruCache::new(capacity)),
            logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watched dist-tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Details of the live module for `tag`.
    ///
    /// Without a tag: the only watched tag, otherwise `latest`. Waits for the
    /// first poll cycle. If no cycle has succeeded, a locally installed copy
    /// is returned when fallback is enabled.
    pub async fn get(&self, tag: Option<&str>) -> Result<Arc<ModuleDetails>, WatcherError> {
        let poller = self.poller(tag)?;
        let live = match poller.result().await {
            Ok(details) => return Ok(details),
            Err(e) => e,
        };

        let Some(root) = &self.fallback else {
            return Err(WatcherError::Unavailable {
                name: self.name.clone(),
                live,
                fallback: None,
            });
        };

        match discover(&self.name, root).await {
            Ok(details) => {
                log_warn!(
                    self.logger,
                    "grabthar_fallback_used",
                    "using local {}@{} from {}: {}",
                    self.name,
                    details.version,
                    details.module_path.display(),
                    live
                );
                Ok(Arc::new(details))
            }
            Err(fallback) => Err(WatcherError::Unavailable {
                name: self.name.clone(),
                live,
                fallback: Some(fallback),
            }),
        }
    }

    /// Resolve `path` inside the live module and load it.
    ///
    /// `None` loads the module's main entry. See [`import_candidates`] for
    /// the lookup order.
    pub async fn import<L: ModuleLoader>(
        &self,
        loader: &L,
        path: Option<&str>,
        tag: Option<&str>,
    ) -> Result<L::Module, WatcherError> {
        let details = self.get(tag).await?;
        let candidates = match path {
            Some(path) => {
                let relative = self.contained(path)?;
                import_candidates(&details, &relative)
            }
            None => vec![details.module_path.clone()],
        };

        for candidate in &candidates {
            if let Some(file) = resolve_entry(candidate).await {
                debug!(module = %self.name, file = %file.display(), "Importing");
                return Ok(loader.load(&file)?);
            }
        }

        Err(WatcherError::ModuleNotFound {
            name: self.name.clone(),
            path: path.unwrap_or(".").to_string(),
            candidates,
        })
    }

    /// Read a UTF-8 file relative to the live module directory.
    ///
    /// `None` reads the main entry. Contents are cached by absolute path;
    /// a new version lives under a new path, so entries never go stale.
    pub async fn read(
        &self,
        path: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Arc<String>, WatcherError> {
        let details = self.get(tag).await?;
        let relative = match path {
            Some(path) => self.contained(path)?,
            None => {
                let manifest = PackageManifest::read(&details.module_path)
                    .await
                    .unwrap_or_default();
                self.contained(manifest.main_entry())?
            }
        };
        let file = details.module_path.join(relative);

        let cached = self.cache().get(&file).cloned();
        if let Some(content) = cached {
            return Ok(content);
        }

        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| WatcherError::Read {
                path: file.clone(),
                source: Arc::new(e),
            })?;
        let content = Arc::new(content);
        self.cache().put(file, Arc::clone(&content));
        Ok(content)
    }

    /// Dependencies installed alongside the live module.
    pub async fn dependencies(
        &self,
        tag: Option<&str>,
    ) -> Result<BTreeMap<String, DependencyDetails>, WatcherError> {
        Ok(self.get(tag).await?.dependencies.clone())
    }

    /// Clear an unstable marking. Takes effect on the next poll cycle.
    pub fn mark_stable(&self, version: &str) {
        log_info!(
            self.logger,
            "grabthar_version_marked_stable",
            "{}@{} marked stable",
            self.name,
            version
        );
        self.stability.mark_stable(version);
    }

    /// Stop serving `version`; the previous stable version is installed
    /// instead from the next poll cycle on.
    pub fn mark_unstable(&self, version: &str) {
        log_warn!(
            self.logger,
            "grabthar_version_marked_unstable",
            "{}@{} marked unstable",
            self.name,
            version
        );
        self.stability.mark_unstable(version);
    }

    pub fn stability(&self) -> &StabilityMap {
        &self.stability
    }

    /// Stop every poller and the sweeper. Cycles already running finish;
    /// [`get`](Self::get) keeps returning the last published details.
    pub fn cancel(&self) {
        for poller in &self.pollers {
            poller.stop();
        }
        if let Some(sweeper) = &self.sweeper {
            sweeper.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.pollers.iter().any(Poller::is_running)
    }

    fn poller(&self, tag: Option<&str>) -> Result<&TagPoller, WatcherError> {
        let index = match tag {
            Some(tag) => self.tags.iter().position(|t| t == tag).ok_or_else(|| {
                WatcherError::UnknownTag {
                    tag: tag.to_string(),
                    tags: self.tags.clone(),
                }
            })?,
            None if self.tags.len() == 1 => 0,
            None => self
                .tags
                .iter()
                .position(|t| t == DEFAULT_TAG)
                .ok_or_else(|| WatcherError::AmbiguousTag {
                    tags: self.tags.clone(),
                })?,
        };
        self.pollers
            .get(index)
            .ok_or_else(|| WatcherError::UnknownTag {
                tag: self.tags[index].clone(),
                tags: self.tags.clone(),
            })
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, Arc<String>>> {
        self.read_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contained(&self, path: &str) -> Result<String, WatcherError> {
        contained_path(path).ok_or_else(|| WatcherError::OutsidePath {
            name: self.name.clone(),
            path: path.to_string(),
        })
    }
}

fn poll_error_hook(
    name: &str,
    logger: &Arc<dyn Logger>,
    user: Option<ErrorCallback<WatchError>>,
) -> impl Fn(&str) -> ErrorCallback<WatchError> {
    let name = name.to_string();
    let logger = Arc::clone(logger);
    move |tag: &str| -> ErrorCallback<WatchError> {
        let name = name.clone();
        let tag = tag.to_string();
        let logger = Arc::clone(&logger);
        let user = user.clone();
        Arc::new(move |e: &WatchError| {
            log_error!(logger, "grabthar_poll_error", "{}@{}: {}", name, tag, e);
            if let Some(user) = &user {
                user(e);
            }
        })
    }
}

/// Everything one tag's poll cycle needs.
struct Cycle {
    name: String,
    tag: String,
    registry: Arc<RegistryClient>,
    installer: Installer,
    install_options: InstallOptions,
    stability: StabilityMap,
    live_dir: PathBuf,
    options: WatcherOptions,
    sweeper: Option<Arc<DirectorySweeper>>,
    logger: Arc<dyn Logger>,
    last_version: Mutex<Option<String>>,
}

impl Cycle {
    async fn run(&self) -> Result<Arc<ModuleDetails>, WatchError> {
        let metadata = self
            .registry
            .fetch_info(&self.name, &self.options.registry)
            .await?;
        let resolved = resolve(&metadata, &self.tag, &self.stability)?;
        let prefix = module_prefix(&self.live_dir, &self.name, &resolved.version);

        self.installer
            .install(
                &self.name,
                &resolved.version,
                Arc::clone(&metadata),
                &prefix,
                &self.install_options,
            )
            .await?;

        if let Some(sweeper) = &self.sweeper {
            sweeper.save(prefix.clone());
        }

        let dependencies: BTreeMap<String, String> = metadata
            .dependencies(&resolved.version)
            .into_iter()
            .flat_map(|deps| deps.iter())
            .filter(|(dep, _)| self.options.includes_child(dep))
            .map(|(dep, version)| (dep.clone(), version.clone()))
            .collect();

        let details = ModuleDetails::for_install(
            &prefix,
            &self.name,
            &resolved.version,
            &resolved.previous_version,
            &dependencies,
        );

        let mut last = self.last_version.lock().unwrap_or_else(|e| e.into_inner());
        if last.as_deref() != Some(resolved.version.as_str()) {
            log_info!(
                self.logger,
                "grabthar_module_updated",
                "{}@{} is live for tag {} (previous {})",
                self.name,
                resolved.version,
                self.tag,
                resolved.previous_version
            );
            *last = Some(resolved.version.clone());
        }

        Ok(Arc::new(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::MockTransport;
    use crate::log::MemoryLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// A watcher whose registry answers 404, with a local copy of `widget`
    /// under `{temp}/app`.
    fn offline_watcher(
        temp: &TempDir,
        options: WatcherOptions,
    ) -> (Watcher, Arc<MemoryLogger>, Arc<MockTransport>) {
        let app = temp.path().join("app");
        let module = app.join("node_modules/widget");
        std::fs::create_dir_all(module.join("lib")).unwrap();
        std::fs::write(
            module.join("package.json"),
            r#"{"name": "widget", "version": "3.1.4", "main": "lib/data.json"}"#,
        )
        .unwrap();
        std::fs::write(module.join("lib/data.json"), r#"{"greeting": "hello"}"#).unwrap();
        std::fs::write(module.join("README.md"), "widget docs").unwrap();

        let transport = Arc::new(MockTransport::new());
        let logger = Arc::new(MemoryLogger::new());
        let services = WatcherServices::new(transport.clone()).with_logger(logger.clone());
        let options = options
            .with_fallback_root(&app)
            .with_live_modules_root(temp.path().join("live"))
            .with_cleanup(false);
        (Watcher::start(options, services), logger, transport)
    }

    #[tokio::test]
    async fn test_tag_selection() {
        let temp = TempDir::new().unwrap();
        let (watcher, _, _) =
            offline_watcher(&temp, WatcherOptions::new("widget").with_tags(["beta", "alpha"]));

        assert!(matches!(
            watcher.get(None).await,
            Err(WatcherError::AmbiguousTag { .. })
        ));
        assert!(matches!(
            watcher.get(Some("latest")).await,
            Err(WatcherError::UnknownTag { .. })
        ));
        assert_eq!(watcher.tags(), ["beta", "alpha"]);
    }

    #[tokio::test]
    async fn test_latest_is_default_among_many() {
        let temp = TempDir::new().unwrap();
        let (watcher, _, _) =
            offline_watcher(&temp, WatcherOptions::new("widget").with_tags(["beta", "latest"]));

        let details = watcher.get(None).await.unwrap();
        assert_eq!(details.version, "3.1.4");
    }

    #[tokio::test]
    async fn test_unavailable_without_fallback() {
        let temp = TempDir::new().unwrap();
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);

        let transport = Arc::new(MockTransport::new());
        let services = WatcherServices::new(transport).with_on_error(Arc::new(move |_: &WatchError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let options = WatcherOptions::new("widget")
            .with_fallback(false)
            .with_live_modules_root(temp.path())
            .with_cleanup(false);
        let watcher = Watcher::start(options, services);

        match watcher.get(None).await {
            Err(WatcherError::Unavailable {
                live: WatchError::Registry(_),
                fallback: None,
                ..
            }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_carries_both_failures() {
        let temp = TempDir::new().unwrap();
        let empty = temp.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();

        let services = WatcherServices::new(Arc::new(MockTransport::new()));
        let options = WatcherOptions::new("widget")
            .with_fallback_root(&empty)
            .with_live_modules_root(temp.path().join("live"))
            .with_cleanup(false);
        let watcher = Watcher::start(options, services);

        match watcher.get(None).await {
            Err(WatcherError::Unavailable {
                live: WatchError::Registry(_),
                fallback: Some(FallbackError::NotFound { .. }),
                ..
            }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_paths_outside_module_are_rejected() {
        let temp = TempDir::new().unwrap();
        let (watcher, _, _) = offline_watcher(&temp, WatcherOptions::new("widget"));
        std::fs::write(temp.path().join("app/node_modules/secret.txt"), "secret").unwrap();

        for path in ["../secret.txt", "lib/../../secret.txt", "/etc/hostname"] {
            assert!(matches!(
                watcher.read(Some(path), None).await,
                Err(WatcherError::OutsidePath { .. })
            ));
            assert!(matches!(
                watcher.import(&BytesLoader, Some(path), None).await,
                Err(WatcherError::OutsidePath { .. })
            ));
        }

        let readme = watcher.read(Some("lib/../README.md"), None).await.unwrap();
        assert_eq!(readme.as_str(), "widget docs");
    }

    #[tokio::test]
    async fn test_fallback_used() {
        let temp = TempDir::new().unwrap();
        let (watcher, logger, transport) = offline_watcher(&temp, WatcherOptions::new("widget"));

        let details = watcher.get(None).await.unwrap();
        assert_eq!(details.version, "3.1.4");
        assert_eq!(
            details.module_path,
            temp.path().join("app/node_modules/widget")
        );
        assert!(transport.request_count() >= 1);
        assert!(logger.contains("grabthar_poll_error"));
        assert!(logger.contains("grabthar_fallback_used"));
    }

    #[tokio::test]
    async fn test_import_and_read() {
        let temp = TempDir::new().unwrap();
        let (watcher, _, _) = offline_watcher(&temp, WatcherOptions::new("widget"));

        let main = watcher.import(&JsonLoader, None, None).await.unwrap();
        assert_eq!(main["greeting"], "hello");

        let bytes = watcher
            .import(&BytesLoader, Some("./README.md"), None)
            .await
            .unwrap();
        assert_eq!(bytes, b"widget docs");

        assert!(matches!(
            watcher.import(&BytesLoader, Some("missing.js"), None).await,
            Err(WatcherError::ModuleNotFound { .. })
        ));

        let first = watcher.read(Some("README.md"), None).await.unwrap();
        let second = watcher.read(Some("README.md"), None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.as_str(), "widget docs");

        let main = watcher.read(None, None).await.unwrap();
        assert!(main.contains("greeting"));

        assert!(matches!(
            watcher.read(Some("absent.txt"), None).await,
            Err(WatcherError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_cache_is_bounded() {
        let temp = TempDir::new().unwrap();
        let (watcher, _, _) = offline_watcher(
            &temp,
            WatcherOptions::new("widget").with_read_cache_capacity(1),
        );

        watcher.read(Some("README.md"), None).await.unwrap();
        watcher.read(Some("lib/data.json"), None).await.unwrap();

        let cache = watcher.cache();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&temp.path().join("app/node_modules/widget/lib/data.json")));
    }

    #[tokio::test]
    async fn test_cancel_stops_pollers() {
        let temp = TempDir::new().unwrap();
        let (watcher, _, _) = offline_watcher(&temp, WatcherOptions::new("widget"));
        assert!(watcher.is_running());

        watcher.cancel();
        assert!(!watcher.is_running());
        // The first outcome is still served.
        assert!(watcher.get(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_stability_marks_are_shared() {
        let temp = TempDir::new().unwrap();
        let (watcher, logger, _) = offline_watcher(&temp, WatcherOptions::new("widget"));

        watcher.mark_unstable("1.0.0");
        assert!(watcher.stability().is_unstable("1.0.0"));
        watcher.mark_stable("1.0.0");
        assert!(!watcher.stability().is_unstable("1.0.0"));
        assert!(logger.contains("grabthar_version_marked_unstable"));
    }
}
