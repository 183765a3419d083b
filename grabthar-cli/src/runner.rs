//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and construction of
//! the library services shared by every command handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use grabthar::config::ConfigFile;
use grabthar::http::{HttpTransport, ReqwestTransport};
use grabthar::install::Installer;
use grabthar::lock::LockService;
use grabthar::log::{Logger, TracingLogger};
use grabthar::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};
use grabthar::registry::{RegistryClient, RegistryOptions};
use grabthar::watcher::WatcherServices;

use crate::error::CliError;

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub registry: Option<String>,
    pub cdn_registry: Option<String>,
    pub config: Option<PathBuf>,
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    _logging_guard: LoggingGuard,
    /// Loaded configuration file, with command-line overrides applied
    config: ConfigFile,
    logger: Arc<dyn Logger>,
}

impl CliRunner {
    /// Load config and initialize logging.
    pub fn new(global: &GlobalOptions) -> Result<Self, CliError> {
        let mut config = match &global.config {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };
        if let Some(registry) = &global.registry {
            config.registry.url = registry.clone();
        }
        if let Some(cdn) = &global.cdn_registry {
            config.registry.cdn_url = Some(cdn.clone());
        }

        let logging_guard = init_logging(&default_log_dir(), default_log_file())
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
            logger: Arc::new(TracingLogger),
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("grabthar v{}", grabthar::VERSION);
        info!(registry = %self.config.registry.url, "grabthar CLI: {} command", command);
    }

    /// Registry locations from config and flags.
    pub fn registry_options(&self) -> RegistryOptions {
        let options = RegistryOptions::new(self.config.registry.url.clone());
        match &self.config.registry.cdn_url {
            Some(cdn) => options.with_cdn_registry(cdn.clone()),
            None => options,
        }
    }

    fn transport(&self) -> Result<Arc<dyn HttpTransport>, CliError> {
        let timeout = Duration::from_secs(self.config.registry.timeout_secs);
        Ok(Arc::new(ReqwestTransport::with_timeout(timeout)?))
    }

    /// Registry client logging through `tracing`.
    pub fn registry_client(&self) -> Result<Arc<RegistryClient>, CliError> {
        Ok(Arc::new(
            RegistryClient::new(self.transport()?)
                .with_logger(Arc::clone(&self.logger))
                .with_info_cache_ttl(self.config.registry.info_cache_ttl),
        ))
    }

    /// Installer sharing `registry`'s transport.
    pub fn installer(&self, registry: Arc<RegistryClient>) -> Installer {
        let locks = LockService::new(Arc::clone(&self.logger))
            .with_stale_after(self.config.install.lock_stale_after);
        Installer::new(registry, Arc::new(locks), Arc::clone(&self.logger))
    }

    /// Collaborators for a watcher.
    pub fn watcher_services(&self) -> Result<WatcherServices, CliError> {
        Ok(WatcherServices::new(self.transport()?).with_logger(Arc::clone(&self.logger)))
    }
}
