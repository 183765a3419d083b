//! Lock service errors.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised while acquiring or releasing a directory lock.
///
/// Contention is never an error: a held lock is waited on, and an abandoned
/// one is reclaimed once it is older than the stale threshold.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// Filesystem operation on the lock file or its directory failed.
    #[error("lock file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl LockError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LockError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}
