//! Install pipeline errors.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::lock::LockError;
use crate::registry::RegistryError;

/// Errors raised while installing a package.
#[derive(Debug, Clone, Error)]
pub enum InstallError {
    /// A dependency is pinned to something other than a plain `X.Y.Z` release.
    #[error("{name} depends on {dependency}@{version}, which is not an exact release version")]
    InvalidDependencyVersion {
        name: String,
        dependency: String,
        version: String,
    },

    /// The version is unpublished or has no tarball URL.
    #[error("no tarball published for {name}@{version}")]
    MissingTarball { name: String, version: String },

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("failed to extract {name}: {reason}")]
    Extract { name: String, reason: String },

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The module directory has no manifest after being put in place.
    #[error("installed module at {path} has no package.json")]
    Verification { path: PathBuf },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to install dependency {name}@{version}: {source}")]
    Dependency {
        name: String,
        version: String,
        #[source]
        source: Box<InstallError>,
    },
}

impl InstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        InstallError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}
