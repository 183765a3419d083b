//! The install pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use rand::Rng;
use reqwest::Url;

use crate::cache::BoxFuture;
use crate::config::STAGING_DIR_PREFIX;
use crate::http::HttpTransport;
use crate::install::{archive, InstallError};
use crate::lock::LockService;
use crate::log::Logger;
use crate::memo::Memoizer;
use crate::paths::{installed_module_dir, manifest_path};
use crate::registry::{PackageMetadata, RegistryClient, RegistryOptions};
use crate::resolve::is_release_version;
use crate::{log_debug, log_info, log_warn};

/// What to install alongside a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InstallOptions {
    /// Also install the package's declared dependencies into the same prefix.
    pub dependencies: bool,
    /// Restrict dependency installs to these names.
    pub child_modules: Option<Vec<String>>,
    /// Where dependency metadata and CDN tarballs come from.
    pub registry: RegistryOptions,
}

impl InstallOptions {
    pub fn new(registry: RegistryOptions) -> Self {
        Self {
            registry,
            ..Default::default()
        }
    }

    pub fn with_dependencies(mut self, dependencies: bool) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_child_modules(mut self, child_modules: Vec<String>) -> Self {
        self.child_modules = Some(child_modules);
        self
    }

    fn wants(&self, dependency: &str) -> bool {
        self.child_modules
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|name| name == dependency))
    }
}

/// Tarball URL for `version`, served from the CDN mirror when the metadata
/// came from it.
pub fn tarball_url(
    metadata: &PackageMetadata,
    version: &str,
    cdn_registry: Option<&str>,
) -> Result<String, InstallError> {
    let tarball = metadata
        .tarball(version)
        .ok_or_else(|| InstallError::MissingTarball {
            name: metadata.name.clone(),
            version: version.to_string(),
        })?;

    match cdn_registry {
        Some(cdn) if metadata.fetched_from_cdn => Ok(rewrite_origin(tarball, cdn)),
        _ => Ok(tarball.to_string()),
    }
}

/// Move `url` onto the scheme, host and port of `origin`, keeping its path
/// and query. Unparseable input is returned unchanged.
fn rewrite_origin(url: &str, origin: &str) -> String {
    let (Ok(mut target), Ok(origin)) = (Url::parse(url), Url::parse(origin)) else {
        return url.to_string();
    };
    if target.origin() == origin.origin() {
        return url.to_string();
    }

    if target.set_scheme(origin.scheme()).is_err()
        || target.set_host(origin.host_str()).is_err()
        || target.set_port(origin.port()).is_err()
    {
        return url.to_string();
    }
    target.to_string()
}

/// Reject dependencies that are not pinned to an exact release.
fn validate_dependencies(
    name: &str,
    dependencies: &BTreeMap<String, String>,
) -> Result<(), InstallError> {
    match dependencies
        .iter()
        .find(|(_, version)| !is_release_version(version))
    {
        Some((dependency, version)) => Err(InstallError::InvalidDependencyVersion {
            name: name.to_string(),
            dependency: dependency.clone(),
            version: version.clone(),
        }),
        None => Ok(()),
    }
}

type InstallKey = (String, String, PathBuf, InstallOptions);

/// Downloads and places packages into version-scoped prefixes.
///
/// Every mutation of a prefix happens under the [`LockService`] lock on it, so
/// installs are safe across tasks and processes. An install whose manifest is
/// already on disk is a no-op, which makes repeat installs free of network
/// traffic. Identical installs that overlap in time share one run.
#[derive(Clone)]
pub struct Installer {
    inner: Arc<InstallerInner>,
}

struct InstallerInner {
    transport: Arc<dyn HttpTransport>,
    registry: Arc<RegistryClient>,
    locks: Arc<LockService>,
    logger: Arc<dyn Logger>,
    in_flight: Memoizer<InstallKey, (), InstallError>,
}

impl Installer {
    /// Create an installer that downloads through the registry client's
    /// transport.
    pub fn new(
        registry: Arc<RegistryClient>,
        locks: Arc<LockService>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            inner: Arc::new(InstallerInner {
                transport: registry.transport(),
                registry,
                locks,
                logger,
                in_flight: Memoizer::in_flight(),
            }),
        }
    }

    /// Install `name@version` into `prefix/node_modules/{name}`.
    pub async fn install(
        &self,
        name: &str,
        version: &str,
        metadata: Arc<PackageMetadata>,
        prefix: &Path,
        options: &InstallOptions,
    ) -> Result<(), InstallError> {
        self.install_shared(
            name.to_string(),
            version.to_string(),
            metadata,
            prefix.to_path_buf(),
            options.clone(),
        )
        .await
    }

    /// Boxed so dependency installs can recurse through it.
    fn install_shared(
        &self,
        name: String,
        version: String,
        metadata: Arc<PackageMetadata>,
        prefix: PathBuf,
        options: InstallOptions,
    ) -> BoxFuture<'static, Result<(), InstallError>> {
        let this = self.clone();
        Box::pin(async move {
            let key = (name.clone(), version.clone(), prefix.clone(), options.clone());
            let runner = this.clone();
            this.inner
                .in_flight
                .get_or_compute(key, move || async move {
                    runner.run(&name, &version, &metadata, &prefix, &options).await
                })
                .await
        })
    }

    async fn run(
        &self,
        name: &str,
        version: &str,
        metadata: &PackageMetadata,
        prefix: &Path,
        options: &InstallOptions,
    ) -> Result<(), InstallError> {
        let dependencies = if options.dependencies {
            let declared = metadata.dependencies(version).cloned().unwrap_or_default();
            validate_dependencies(name, &declared)?;
            declared
        } else {
            BTreeMap::new()
        };

        let module_dir = installed_module_dir(prefix, name);
        if manifest_exists(&module_dir).await {
            log_debug!(
                self.inner.logger,
                "grabthar_install_skipped",
                "{}@{} already installed in {}",
                name,
                version,
                prefix.display()
            );
        } else {
            let url = tarball_url(metadata, version, options.registry.cdn_registry.as_deref())?;
            self.inner
                .locks
                .with_lock(prefix, || self.place_locked(name, version, &url, prefix, &module_dir))
                .await??;
        }

        self.install_dependencies(name, dependencies, prefix, options)
            .await
    }

    /// Lock-holding part of an install.
    async fn place_locked(
        &self,
        name: &str,
        version: &str,
        url: &str,
        prefix: &Path,
        module_dir: &Path,
    ) -> Result<(), InstallError> {
        // Another process may have finished while we waited for the lock.
        if manifest_exists(module_dir).await {
            return Ok(());
        }

        log_info!(
            self.inner.logger,
            "grabthar_install_start",
            "installing {}@{} into {}",
            name,
            version,
            prefix.display()
        );

        let result = self.place(name, url, prefix, module_dir).await;
        match &result {
            Ok(()) => log_info!(
                self.inner.logger,
                "grabthar_install_complete",
                "installed {}@{}",
                name,
                version
            ),
            Err(e) => {
                log_warn!(
                    self.inner.logger,
                    "grabthar_install_failed",
                    "{}@{}: {}",
                    name,
                    version,
                    e
                );
                remove_dir_if_present(module_dir).await;
            }
        }
        result
    }

    async fn place(
        &self,
        name: &str,
        url: &str,
        prefix: &Path,
        module_dir: &Path,
    ) -> Result<(), InstallError> {
        if let Some(parent) = module_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InstallError::io(parent, e))?;
        }
        if tokio::fs::try_exists(module_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(module_dir)
                .await
                .map_err(|e| InstallError::io(module_dir, e))?;
        }

        let staging = staging_dir(prefix);
        let result = self.stage_and_move(name, url, &staging, module_dir).await;
        remove_dir_if_present(&staging).await;
        result?;

        if !manifest_exists(module_dir).await {
            return Err(InstallError::Verification {
                path: module_dir.to_path_buf(),
            });
        }
        Ok(())
    }

    async fn stage_and_move(
        &self,
        name: &str,
        url: &str,
        staging: &Path,
        module_dir: &Path,
    ) -> Result<(), InstallError> {
        let response = self
            .inner
            .transport
            .get(url)
            .await
            .map_err(|e| InstallError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.is_success() {
            return Err(InstallError::Download {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status),
            });
        }

        let body = response.body;
        let dest = staging.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || {
            archive::unpack(&body, &dest)?;
            archive::top_level_dir(&dest)
        })
        .await
        .map_err(|e| InstallError::Extract {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .map_err(|e| InstallError::Extract {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        tokio::fs::rename(&extracted, module_dir)
            .await
            .map_err(|e| InstallError::io(module_dir, e))
    }

    async fn install_dependencies(
        &self,
        name: &str,
        dependencies: BTreeMap<String, String>,
        prefix: &Path,
        options: &InstallOptions,
    ) -> Result<(), InstallError> {
        let child_options = InstallOptions {
            dependencies: false,
            child_modules: None,
            registry: options.registry.clone(),
        };

        let installs = dependencies
            .into_iter()
            .filter(|(dependency, _)| options.wants(dependency))
            .map(|(dependency, version)| {
                let this = self.clone();
                let prefix = prefix.to_path_buf();
                let child_options = child_options.clone();
                async move {
                    this.install_dependency(&dependency, &version, &prefix, &child_options)
                        .await
                        .map_err(|e| InstallError::Dependency {
                            name: dependency.clone(),
                            version: version.clone(),
                            source: Box::new(e),
                        })
                }
            });

        let failures: Vec<InstallError> = join_all(installs)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        match failures.into_iter().next() {
            Some(first) => {
                log_warn!(
                    self.inner.logger,
                    "grabthar_dependency_install_failed",
                    "{}: {}",
                    name,
                    first
                );
                Err(first)
            }
            None => Ok(()),
        }
    }

    async fn install_dependency(
        &self,
        name: &str,
        version: &str,
        prefix: &Path,
        options: &InstallOptions,
    ) -> Result<(), InstallError> {
        if manifest_exists(&installed_module_dir(prefix, name)).await {
            return Ok(());
        }

        let metadata = self.inner.registry.fetch_info(name, &options.registry).await?;
        self.install_shared(
            name.to_string(),
            version.to_string(),
            metadata,
            prefix.to_path_buf(),
            options.clone(),
        )
        .await
    }
}

async fn manifest_exists(module_dir: &Path) -> bool {
    tokio::fs::try_exists(manifest_path(module_dir))
        .await
        .unwrap_or(false)
}

async fn remove_dir_if_present(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dir.display(), error = %e, "failed to remove directory"),
    }
}

/// Unique staging directory next to `prefix`:
/// `.grabthar_staging_{pid}_{token}`.
fn staging_dir(prefix: &Path) -> PathBuf {
    let token: u64 = rand::thread_rng().gen();
    let parent = prefix.parent().unwrap_or(prefix);
    parent.join(format!(
        "{}_{}_{:016x}",
        STAGING_DIR_PREFIX,
        std::process::id(),
        token
    ))
}
