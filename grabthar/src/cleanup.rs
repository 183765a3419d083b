//! Background removal of abandoned live module directories.
//!
//! Every version a watcher installs gets its own prefix under the live
//! modules directory. Prefixes nobody has touched for longer than the
//! threshold are removed, except those registered with
//! [`DirectorySweeper::save`]. Leftover staging directories from crashed
//! installs age out the same way.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{DEFAULT_LOCK_STALE_AFTER, NODE_MODULES, STAGING_DIR_PREFIX};
use crate::lock;
use crate::log::Logger;
use crate::paths::is_module_prefix_name;
use crate::{log_info, log_warn};

/// Periodically sweeps one live modules directory.
pub struct DirectorySweeper {
    inner: Arc<SweeperInner>,
    token: CancellationToken,
    _task: Option<JoinHandle<()>>,
}

struct SweeperInner {
    dir: PathBuf,
    threshold: Duration,
    saved: Mutex<HashSet<PathBuf>>,
    logger: Arc<dyn Logger>,
}

impl DirectorySweeper {
    /// A sweeper that only runs when [`sweep_once`](Self::sweep_once) is
    /// called.
    pub fn new(dir: impl Into<PathBuf>, threshold: Duration, logger: Arc<dyn Logger>) -> Self {
        Self {
            inner: Arc::new(SweeperInner {
                dir: dir.into(),
                threshold,
                saved: Mutex::new(HashSet::new()),
                logger,
            }),
            token: CancellationToken::new(),
            _task: None,
        }
    }

    /// Start sweeping `dir` every `interval`. The first sweep happens one
    /// interval after start.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        dir: impl Into<PathBuf>,
        interval: Duration,
        threshold: Duration,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let mut sweeper = Self::new(dir, threshold, logger);
        let task = tokio::spawn(run(
            Arc::clone(&sweeper.inner),
            interval,
            sweeper.token.clone(),
        ));
        sweeper._task = Some(task);
        sweeper
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Exempt `path` from removal.
    pub fn save(&self, path: impl Into<PathBuf>) {
        self.inner
            .saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into());
    }

    pub fn is_saved(&self, path: &Path) -> bool {
        self.inner
            .saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    /// Run one sweep now. Returns the number of directories removed.
    pub async fn sweep_once(&self) -> usize {
        self.inner.sweep().await
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for DirectorySweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(inner: Arc<SweeperInner>, interval: Duration, token: CancellationToken) {
    debug!(
        dir = %inner.dir.display(),
        interval_secs = interval.as_secs(),
        threshold_secs = inner.threshold.as_secs(),
        "Directory sweeper starting"
    );

    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(dir = %inner.dir.display(), "Directory sweeper stopped");
                break;
            }

            _ = ticker.tick() => {
                inner.sweep().await;
            }
        }
    }
}

impl SweeperInner {
    async fn sweep(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                log_warn!(
                    self.logger,
                    "grabthar_cleanup_task_failed",
                    "failed to list {}: {}",
                    self.dir.display(),
                    e
                );
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    log_warn!(
                        self.logger,
                        "grabthar_cleanup_task_failed",
                        "failed to list {}: {}",
                        self.dir.display(),
                        e
                    );
                    break;
                }
            };

            let path = entry.path();
            if !self.is_candidate(&path).await || self.is_saved(&path) {
                continue;
            }

            let age = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => now.duration_since(modified).unwrap_or_default(),
                Err(_) => continue,
            };
            if age < self.threshold {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "Removed stale directory");
                    removed += 1;
                }
                Err(e) => log_warn!(
                    self.logger,
                    "grabthar_cleanup_task_failed",
                    "failed to remove {}: {}",
                    path.display(),
                    e
                ),
            }
        }

        log_info!(
            self.logger,
            "grabthar_cleanup_task_successful",
            "swept {}: removed {} directories",
            self.dir.display(),
            removed
        );
        removed
    }

    fn is_saved(&self, path: &Path) -> bool {
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    /// Install prefixes (including ones a failed install left without
    /// `node_modules`) and staging directories; anything else, such as a CDN
    /// mirror's subtree, is left alone. A directory under a live lock is
    /// never a candidate.
    async fn is_candidate(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let recognized = name.starts_with(STAGING_DIR_PREFIX)
            || is_module_prefix_name(name)
            || tokio::fs::metadata(path.join(NODE_MODULES))
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
        recognized && !lock::is_held(path, DEFAULT_LOCK_STALE_AFTER).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLogger;
    use tempfile::TempDir;

    fn make_prefix(dir: &Path, name: &str) -> PathBuf {
        let prefix = dir.join(name);
        std::fs::create_dir_all(prefix.join("node_modules/widget")).unwrap();
        prefix
    }

    #[tokio::test]
    async fn test_sweep_removes_old_and_keeps_saved() {
        let temp = TempDir::new().unwrap();
        let old = make_prefix(temp.path(), "widget_1.0.0");
        let kept = make_prefix(temp.path(), "widget_1.1.0");
        let staging = temp.path().join(".grabthar_staging_1_abc");
        std::fs::create_dir_all(&staging).unwrap();
        let mirror = temp.path().join("cdn_example_com");
        std::fs::create_dir_all(&mirror).unwrap();

        let logger = Arc::new(MemoryLogger::new());
        let sweeper = DirectorySweeper::new(temp.path(), Duration::ZERO, logger.clone());
        sweeper.save(&kept);

        assert_eq!(sweeper.sweep_once().await, 2);
        assert!(!old.exists());
        assert!(!staging.exists());
        assert!(kept.exists());
        assert!(mirror.exists());
        assert!(logger.contains("grabthar_cleanup_task_successful"));
    }

    #[tokio::test]
    async fn test_sweep_removes_prefix_left_by_failed_install() {
        let temp = TempDir::new().unwrap();
        let failed = temp.path().join("widget_2.0.0");
        std::fs::create_dir_all(&failed).unwrap();
        std::fs::write(failed.join(crate::config::LOCK_FILE_NAME), "1:dead:1000").unwrap();
        let locked = temp.path().join("widget_2.1.0");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(
            locked.join(crate::config::LOCK_FILE_NAME),
            format!("1:live:{}", crate::lock::now_millis()),
        )
        .unwrap();

        let sweeper =
            DirectorySweeper::new(temp.path(), Duration::ZERO, Arc::new(MemoryLogger::new()));

        assert_eq!(sweeper.sweep_once().await, 1);
        assert!(!failed.exists());
        assert!(locked.exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent() {
        let temp = TempDir::new().unwrap();
        let recent = make_prefix(temp.path(), "widget_1.0.0");

        let sweeper = DirectorySweeper::new(
            temp.path(),
            Duration::from_secs(3600),
            Arc::new(MemoryLogger::new()),
        );

        assert_eq!(sweeper.sweep_once().await, 0);
        assert!(recent.exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_dir() {
        let temp = TempDir::new().unwrap();
        let sweeper = DirectorySweeper::new(
            temp.path().join("absent"),
            Duration::ZERO,
            Arc::new(MemoryLogger::new()),
        );
        assert_eq!(sweeper.sweep_once().await, 0);
    }

    #[tokio::test]
    async fn test_start_and_cancel() {
        let temp = TempDir::new().unwrap();
        let sweeper = DirectorySweeper::start(
            temp.path(),
            Duration::from_secs(60),
            Duration::ZERO,
            Arc::new(MemoryLogger::new()),
        );
        assert!(!sweeper.is_cancelled());
        sweeper.cancel();
        assert!(sweeper.is_cancelled());
    }
}
