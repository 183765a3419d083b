//! Watcher error types.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::install::InstallError;
use crate::registry::RegistryError;
use crate::resolve::VersionResolutionError;

/// Failure of one poll cycle.
#[derive(Debug, Clone, Error)]
pub enum WatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolution(#[from] VersionResolutionError),

    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Failure to find a usable local installation.
#[derive(Debug, Clone, Error)]
pub enum FallbackError {
    #[error("no local installation of {name} found above {root}")]
    NotFound { name: String, root: PathBuf },

    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

/// Failure to load a module file.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to load library {path}: {reason}")]
    Library { path: PathBuf, reason: String },
}

/// Errors returned to watcher callers.
#[derive(Debug, Clone, Error)]
pub enum WatcherError {
    /// Several tags are watched and none of them is `latest`.
    #[error("watching tags {tags:?}; specify which one to use")]
    AmbiguousTag { tags: Vec<String> },

    /// The requested tag is not watched.
    #[error("tag {tag} is not watched (watching {tags:?})")]
    UnknownTag { tag: String, tags: Vec<String> },

    /// The live module failed and no local copy could stand in for it.
    #[error("{name} is unavailable: {live}{}", describe_fallback(.fallback))]
    Unavailable {
        name: String,
        live: WatchError,
        fallback: Option<FallbackError>,
    },

    /// No import candidate exists on disk.
    #[error("cannot find {path} in {name} (looked in {candidates:?})")]
    ModuleNotFound {
        name: String,
        path: String,
        candidates: Vec<PathBuf>,
    },

    /// The requested path is absolute or climbs out of the module directory.
    #[error("{path} is outside of {name}")]
    OutsidePath { name: String, path: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

fn describe_fallback(fallback: &Option<FallbackError>) -> String {
    match fallback {
        Some(e) => format!("; local fallback failed: {e}"),
        None => "; local fallback disabled".to_string(),
    }
}
