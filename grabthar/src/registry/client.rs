//! Registry client with layered caching.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::ExternalCache;
use crate::config::{
    CDN_CACHE_BUST_WINDOW, CDN_REGISTRY_INFO_FILENAME, DEFAULT_INFO_CACHE_TTL, DEFAULT_REGISTRY,
    INFO_CACHE_KEY_PREFIX,
};
use crate::http::HttpTransport;
use crate::lock::now_millis;
use crate::log::{Logger, NoOpLogger};
use crate::memo::Memoizer;
use crate::paths::{name_without_scope, sanitize};
use crate::registry::{PackageMetadata, RegistryError};
use crate::{log_debug, log_warn};

/// Where to fetch package documents from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryOptions {
    /// Primary registry base URL.
    pub registry: String,
    /// Optional CDN mirror tried before the primary registry.
    pub cdn_registry: Option<String>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            cdn_registry: None,
        }
    }
}

impl RegistryOptions {
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            cdn_registry: None,
        }
    }

    pub fn with_cdn_registry(mut self, cdn_registry: impl Into<String>) -> Self {
        self.cdn_registry = Some(cdn_registry.into());
        self
    }
}

/// Key under which a package document is stored in the external cache.
pub fn info_cache_key(name: &str, cdn_registry: Option<&str>) -> String {
    format!(
        "{}_{}_{}",
        INFO_CACHE_KEY_PREFIX,
        sanitize(name),
        sanitize(cdn_registry.unwrap_or("npm"))
    )
}

/// Primary registry document URL. Scoped names keep their `@` but encode the
/// separating slash.
pub fn registry_url(registry: &str, name: &str) -> String {
    format!("{}/{}", registry.trim_end_matches('/'), name.replace('/', "%2F"))
}

/// CDN mirror document URL for the cache-bust bucket containing `now_ms`.
pub fn cdn_info_url(cdn_registry: &str, name: &str, now_ms: u64) -> String {
    let bucket = now_ms / CDN_CACHE_BUST_WINDOW.as_millis() as u64;
    format!(
        "{}/{}/{}?cache-bust={}",
        cdn_registry.trim_end_matches('/'),
        name_without_scope(name),
        CDN_REGISTRY_INFO_FILENAME,
        bucket
    )
}

/// Fetches package metadata.
///
/// Lookups try, in order:
/// 1. the external cache, if one is configured;
/// 2. the network (CDN mirror first when configured, then the primary
///    registry), writing successes through to the external cache and to an
///    in-process backup copy;
/// 3. the backup copy from the last successful network fetch.
///
/// Identical lookups within the info cache TTL share a single fetch.
pub struct RegistryClient {
    inner: Arc<ClientInner>,
    memo: Memoizer<(String, RegistryOptions), Arc<PackageMetadata>, RegistryError>,
}

struct ClientInner {
    transport: Arc<dyn HttpTransport>,
    cache: Option<Arc<dyn ExternalCache>>,
    logger: Arc<dyn Logger>,
    backup: Mutex<HashMap<String, Arc<PackageMetadata>>>,
}

impl RegistryClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                cache: None,
                logger: Arc::new(NoOpLogger),
                backup: Mutex::new(HashMap::new()),
            }),
            memo: Memoizer::with_ttl(DEFAULT_INFO_CACHE_TTL),
        }
    }

    /// Read and write package documents through an external cache.
    pub fn with_cache(mut self, cache: Arc<dyn ExternalCache>) -> Self {
        self.inner = Arc::new(ClientInner {
            cache: Some(cache),
            ..self.inner.detached()
        });
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.inner = Arc::new(ClientInner {
            logger,
            ..self.inner.detached()
        });
        self
    }

    /// How long identical lookups share one result.
    pub fn with_info_cache_ttl(mut self, ttl: Duration) -> Self {
        self.memo = Memoizer::with_ttl(ttl);
        self
    }

    /// The transport used for registry requests.
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.inner.transport)
    }

    /// Fetch the metadata document for `name`.
    pub async fn fetch_info(
        &self,
        name: &str,
        options: &RegistryOptions,
    ) -> Result<Arc<PackageMetadata>, RegistryError> {
        let key = (name.to_string(), options.clone());
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        let options = options.clone();

        self.memo
            .get_or_compute(key, move || async move { inner.fetch(&name, &options).await })
            .await
    }

    /// Forget every memoized and backup document.
    pub fn reset(&self) {
        self.memo.reset();
        self.inner
            .backup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl ClientInner {
    /// Same collaborators, empty backup.
    fn detached(&self) -> ClientInner {
        ClientInner {
            transport: Arc::clone(&self.transport),
            cache: self.cache.clone(),
            logger: Arc::clone(&self.logger),
            backup: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(
        &self,
        name: &str,
        options: &RegistryOptions,
    ) -> Result<Arc<PackageMetadata>, RegistryError> {
        let cache_key = info_cache_key(name, options.cdn_registry.as_deref());

        match self.from_external_cache(&cache_key).await {
            Ok(Some(meta)) => return Ok(meta),
            Ok(None) => {}
            Err(e) => log_warn!(self.logger, "grabthar_npm_info_cache_read_failure", "{}", e),
        }

        let network_error = match self.from_network(name, options).await {
            Ok(meta) => {
                let meta = Arc::new(meta);
                self.store(&cache_key, &meta).await;
                return Ok(meta);
            }
            Err(e) => {
                log_warn!(self.logger, "grabthar_npm_info_fetch_failure", "{}: {}", name, e);
                e
            }
        };

        if let Some(meta) = self.from_backup(&cache_key) {
            log_warn!(
                self.logger,
                "grabthar_npm_info_backup_used",
                "serving last known metadata for {}",
                name
            );
            return Ok(meta);
        }

        Err(network_error)
    }

    async fn from_external_cache(
        &self,
        key: &str,
    ) -> Result<Option<Arc<PackageMetadata>>, RegistryError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };

        let cached = cache.get(key).await.map_err(|e| RegistryError::Cache {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match cached {
            Some(json) => {
                let meta: PackageMetadata =
                    serde_json::from_str(&json).map_err(|e| RegistryError::Cache {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                log_debug!(self.logger, "grabthar_npm_info_cache_hit", "{}", key);
                Ok(Some(Arc::new(meta)))
            }
            None => Ok(None),
        }
    }

    async fn from_network(
        &self,
        name: &str,
        options: &RegistryOptions,
    ) -> Result<PackageMetadata, RegistryError> {
        if let Some(cdn) = &options.cdn_registry {
            let url = cdn_info_url(cdn, name, now_millis());
            match self.get_document(&url).await {
                Ok(mut meta) => {
                    meta.fetched_from_cdn = true;
                    return Ok(meta);
                }
                Err(e) => {
                    log_warn!(self.logger, "grabthar_cdn_registry_failure", "{}", e);
                }
            }
        }

        let url = registry_url(&options.registry, name);
        let mut meta = self.get_document(&url).await?;
        meta.fetched_from_cdn = false;
        Ok(meta)
    }

    async fn get_document(&self, url: &str) -> Result<PackageMetadata, RegistryError> {
        let response = self
            .transport
            .get(url)
            .await
            .map_err(|e| RegistryError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.is_success() {
            return Err(RegistryError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        serde_json::from_slice(&response.body).map_err(|e| RegistryError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn store(&self, key: &str, meta: &Arc<PackageMetadata>) {
        self.backup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Arc::clone(meta));

        let Some(cache) = &self.cache else {
            return;
        };

        let result = match serde_json::to_string(meta.as_ref()) {
            Ok(json) => cache.set(key, json).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = result {
            log_warn!(
                self.logger,
                "grabthar_npm_info_cache_write_failure",
                "{}: {}",
                key,
                reason
            );
        }
    }

    fn from_backup(&self, key: &str) -> Option<Arc<PackageMetadata>> {
        self.backup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}
