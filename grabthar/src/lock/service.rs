//! Directory lock service.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{DEFAULT_LOCK_POLL_INTERVAL, DEFAULT_LOCK_STALE_AFTER, LOCK_FILE_NAME};
use crate::lock::file::{self, Holder, LockGuard, Reclaim};
use crate::lock::LockError;
use crate::log::{Logger, NoOpLogger};
use crate::{log_debug, log_warn};

/// Serializes work on a directory across tasks and processes.
///
/// Callers in this process queue on a per-directory async mutex; the holder
/// then takes the lock file so other processes sharing the filesystem wait
/// too. A lock file older than `stale_after` is treated as abandoned by a
/// crashed holder and reclaimed.
pub struct LockService {
    poll_interval: Duration,
    stale_after: Duration,
    local: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    logger: Arc<dyn Logger>,
}

impl Default for LockService {
    fn default() -> Self {
        Self::new(Arc::new(NoOpLogger))
    }
}

impl LockService {
    /// Create a lock service with default timings.
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            stale_after: DEFAULT_LOCK_STALE_AFTER,
            local: Mutex::new(HashMap::new()),
            logger,
        }
    }

    /// How often a waiter re-checks a held lock.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Age after which a held lock is reclaimed.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Run `task` while holding the lock on `dir`.
    ///
    /// The directory is created if needed. The lock is released whatever the
    /// task returns; the task's output is passed through untouched.
    ///
    /// # Errors
    ///
    /// Only lock file I/O fails this call. Contention just waits.
    pub async fn with_lock<F, Fut, T>(&self, dir: &Path, task: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let local = self.local_mutex(dir);
        let output = {
            let _queued = local.lock().await;
            let guard = self.acquire(dir).await?;
            let output = task().await;
            let lock_path = guard.path().to_path_buf();
            if let Err(e) = guard.release().await {
                log_warn!(
                    self.logger,
                    "grabthar_lock_release_failed",
                    "failed to release {}: {}",
                    lock_path.display(),
                    e
                );
            }
            output
        };
        drop(local);
        self.prune(dir);
        Ok(output)
    }

    async fn acquire(&self, dir: &Path) -> Result<LockGuard, LockError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| LockError::io(dir, e))?;
        let path = dir.join(LOCK_FILE_NAME);

        loop {
            if let Some(stamp) = file::try_create(&path)
                .await
                .map_err(|e| LockError::io(&path, e))?
            {
                log_debug!(self.logger, "grabthar_lock_acquired", "{}", path.display());
                return Ok(LockGuard::new(path, stamp));
            }

            match file::inspect(&path, self.stale_after)
                .await
                .map_err(|e| LockError::io(&path, e))?
            {
                Holder::Gone => continue,
                Holder::Fresh => tokio::time::sleep(self.poll_interval).await,
                Holder::Stale { age, .. } => match file::reclaim(&path, self.stale_after)
                    .await
                    .map_err(|e| LockError::io(&path, e))?
                {
                    Reclaim::Removed => log_warn!(
                        self.logger,
                        "grabthar_lock_reclaimed",
                        "reclaimed stale lock {} held for {}ms",
                        path.display(),
                        age.as_millis()
                    ),
                    Reclaim::Busy => tokio::time::sleep(self.poll_interval).await,
                    Reclaim::Skipped => {}
                    Reclaim::Displaced => log_warn!(
                        self.logger,
                        "grabthar_lock_displaced",
                        "lock {} changed hands while reclaiming it",
                        path.display()
                    ),
                },
            }
        }
    }

    fn local_mutex(&self, dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut local = self.local.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            local
                .entry(dir.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Forget a directory's mutex once nobody is queued on it.
    fn prune(&self, dir: &Path) {
        let mut local = self.local.lock().unwrap_or_else(|e| e.into_inner());
        if local
            .get(dir)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            local.remove(dir);
        }
    }

    #[cfg(test)]
    fn tracked_dirs(&self) -> usize {
        self.local.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tempfile::TempDir;

    fn fast_service() -> LockService {
        LockService::default().with_poll_interval(Duration::from_millis(5))
    }

    async fn exclusive_task(active: Arc<AtomicUsize>, max_seen: Arc<AtomicUsize>) {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        active.fetch_sub(1, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_same_service_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let service = fast_service();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            service.with_lock(temp.path(), || exclusive_task(active.clone(), max_seen.clone())),
            service.with_lock(temp.path(), || exclusive_task(active.clone(), max_seen.clone())),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!temp.path().join(LOCK_FILE_NAME).exists());
        assert_eq!(service.tracked_dirs(), 0);
    }

    #[tokio::test]
    async fn test_separate_services_share_lock_file() {
        // Two services stand in for two processes: only the file excludes them.
        let temp = TempDir::new().unwrap();
        let first = fast_service();
        let second = fast_service();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            first.with_lock(temp.path(), || exclusive_task(active.clone(), max_seen.clone())),
            second.with_lock(temp.path(), || exclusive_task(active.clone(), max_seen.clone())),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_when_task_fails() {
        let temp = TempDir::new().unwrap();
        let service = fast_service();

        let result: Result<Result<(), String>, LockError> = service
            .with_lock(temp.path(), || async { Err("task failed".to_string()) })
            .await;

        assert_eq!(result.unwrap(), Err("task failed".to_string()));
        assert!(!temp.path().join(LOCK_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join(LOCK_FILE_NAME);
        std::fs::write(&lock_path, "1000").unwrap();

        let logger = Arc::new(MemoryLogger::new());
        let service = LockService::new(logger.clone())
            .with_poll_interval(Duration::from_millis(5))
            .with_stale_after(Duration::from_secs(1));

        let start = Instant::now();
        let value = service
            .with_lock(temp.path(), || async { 7 })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(logger.contains("grabthar_lock_reclaimed"));
        assert!(!lock_path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_lock_reclaimed_by_one_of_many_processes() {
        // Each service stands in for a separate process.
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let lock_path = dir.join(LOCK_FILE_NAME);
        let services: Vec<Arc<LockService>> = (0..8)
            .map(|_| {
                Arc::new(
                    LockService::default()
                        .with_poll_interval(Duration::from_millis(1))
                        .with_stale_after(Duration::from_secs(1)),
                )
            })
            .collect();

        for round in 0..50 {
            std::fs::write(&lock_path, "1000").unwrap();
            let active = Arc::new(AtomicUsize::new(0));
            let max_seen = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = services
                .iter()
                .map(|service| {
                    let service = Arc::clone(service);
                    let dir = dir.clone();
                    let active = Arc::clone(&active);
                    let max_seen = Arc::clone(&max_seen);
                    tokio::spawn(async move {
                        service
                            .with_lock(&dir, || async move {
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                max_seen.fetch_max(now, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(2)).await;
                                active.fetch_sub(1, Ordering::SeqCst);
                            })
                            .await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            assert_eq!(max_seen.load(Ordering::SeqCst), 1, "round {round}");
            assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0, "round {round}");
        }
    }

    #[tokio::test]
    async fn test_waits_for_fresh_lock() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join(LOCK_FILE_NAME);
        std::fs::write(&lock_path, file::new_stamp()).unwrap();

        let release_path = lock_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::remove_file(release_path).unwrap();
        });

        let start = Instant::now();
        fast_service()
            .with_lock(temp.path(), || async {})
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");

        fast_service().with_lock(&dir, || async {}).await.unwrap();
        assert!(dir.is_dir());
    }
}
