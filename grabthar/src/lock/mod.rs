//! Cross-process directory locking.
//!
//! [`LockService::with_lock`] runs a task while holding `{dir}/grabthar.lock`.
//! The install pipeline wraps every mutation of a live module prefix in it, so
//! any number of tasks and processes sharing the live module tree can install
//! concurrently without corrupting each other.

mod error;
mod file;
mod service;

use std::path::Path;
use std::time::Duration;

use crate::config::LOCK_FILE_NAME;

pub use error::LockError;
pub(crate) use file::now_millis;
pub use file::LockGuard;
pub use service::LockService;

/// Whether `dir` holds a lock file younger than `stale_after`.
///
/// An unreadable lock counts as held.
pub(crate) async fn is_held(dir: &Path, stale_after: Duration) -> bool {
    !matches!(
        file::inspect(&dir.join(LOCK_FILE_NAME), stale_after).await,
        Ok(file::Holder::Gone | file::Holder::Stale { .. })
    )
}
