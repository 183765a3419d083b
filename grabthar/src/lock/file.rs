//! The on-disk lock file.
//!
//! A lock is held by whoever creates `{dir}/grabthar.lock` first. Its content
//! is a stamp `{pid}:{token}:{epoch_ms}`: the token tells owners apart, and the
//! acquisition time lets waiters decide whether the holder has been abandoned.
//!
//! Reclaiming an abandoned lock is itself serialized through the sibling
//! `grabthar.lock.reclaim` file, and the stale lock is moved aside with an
//! atomic rename before it is deleted, so a waiter can never delete a lock
//! another waiter has just taken.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::io::AsyncWriteExt;

/// Current time in epoch milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A fresh, unique lock stamp.
pub(crate) fn new_stamp() -> String {
    format!("{}:{}:{}", std::process::id(), random_token(), now_millis())
}

fn random_token() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// Acquisition time recorded in a stamp. Bare epoch milliseconds are accepted
/// too.
fn stamp_millis(content: &str) -> Option<u64> {
    content.trim().rsplit(':').next()?.parse().ok()
}

/// `{lock}.{suffix}` next to the lock file.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Observed state of a lock file held by someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Holder {
    /// The file vanished between our create attempt and the inspection.
    Gone,
    /// Held, and younger than the stale threshold.
    Fresh,
    /// Held for longer than the stale threshold. Carries the raw content so
    /// reclamation can check nobody replaced it in the meantime.
    Stale { content: String, age: Duration },
}

/// Try to create the lock file exclusively and stamp it.
///
/// The stamp is written to a private file first and hard-linked into place,
/// so the lock never appears with partial content.
///
/// Returns the stamp written, or `Ok(None)` if someone else holds it.
pub(crate) async fn try_create(path: &Path) -> io::Result<Option<String>> {
    let stamp = new_stamp();
    let pending = sibling(
        path,
        &format!("new.{}.{}", std::process::id(), random_token()),
    );

    let linked = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&pending)
            .await?;
        file.write_all(stamp.as_bytes()).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::hard_link(&pending, path).await
    }
    .await;
    remove_if_exists(&pending).await?;

    match linked {
        Ok(()) => Ok(Some(stamp)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

/// Inspect a lock file somebody else created.
pub(crate) async fn inspect(path: &Path, stale_after: Duration) -> io::Result<Holder> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Holder::Gone),
        Err(e) => return Err(e),
    };

    let age = match stamp_millis(&content) {
        Some(stamp) => Duration::from_millis(now_millis().saturating_sub(stamp)),
        // Not written by us: fall back to the file's age.
        None => match modified_age(path).await? {
            Some(age) => age,
            None => return Ok(Holder::Gone),
        },
    };

    if age > stale_after {
        Ok(Holder::Stale { content, age })
    } else {
        Ok(Holder::Fresh)
    }
}

/// Time since `path` was last modified, or `None` if it does not exist.
async fn modified_age(path: &Path) -> io::Result<Option<Duration>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(
            meta.modified()
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .unwrap_or_default(),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Outcome of one attempt to reclaim a stale lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reclaim {
    /// The stale lock was deleted.
    Removed,
    /// Another waiter is reclaiming right now.
    Busy,
    /// The lock was released or replaced before we got to it.
    Skipped,
    /// A fresh lock was moved aside and could not be put back because yet
    /// another waiter had already taken the path.
    Displaced,
}

/// Removes the reclaim sentinel when reclamation ends, however it ends.
struct Sentinel(PathBuf);

impl Drop for Sentinel {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Reclaim the lock at `path` if it is still stale.
///
/// Only one waiter at a time gets past the sentinel. A sentinel older than
/// `stale_after` belongs to a crashed reclaimer and is cleared.
pub(crate) async fn reclaim(path: &Path, stale_after: Duration) -> io::Result<Reclaim> {
    let sentinel_path = sibling(path, "reclaim");
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&sentinel_path)
        .await
    {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if modified_age(&sentinel_path)
                .await?
                .is_some_and(|age| age > stale_after)
            {
                remove_if_exists(&sentinel_path).await?;
            }
            return Ok(Reclaim::Busy);
        }
        Err(e) => return Err(e),
    }
    let _sentinel = Sentinel(sentinel_path);

    // Another reclaimer may have finished while we queued on the sentinel.
    let expected = match inspect(path, stale_after).await? {
        Holder::Stale { content, .. } => content,
        Holder::Gone | Holder::Fresh => return Ok(Reclaim::Skipped),
    };

    let parked = sibling(
        path,
        &format!("stale.{}.{}", std::process::id(), random_token()),
    );
    match tokio::fs::rename(path, &parked).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Reclaim::Skipped),
        Err(e) => return Err(e),
    }

    let moved = match tokio::fs::read_to_string(&parked).await {
        Ok(content) => content,
        Err(e) => {
            remove_if_exists(&parked).await?;
            return Err(e);
        }
    };
    if moved == expected {
        remove_if_exists(&parked).await?;
        return Ok(Reclaim::Removed);
    }

    // The stale holder released and a new holder took the path between the
    // inspection and the rename. Put its lock back without clobbering.
    let outcome = match tokio::fs::hard_link(&parked, path).await {
        Ok(()) => Reclaim::Skipped,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Reclaim::Displaced,
        Err(e) => {
            remove_if_exists(&parked).await?;
            return Err(e);
        }
    };
    remove_if_exists(&parked).await?;
    Ok(outcome)
}

/// Remove `path` if its content is still `expected`.
///
/// Returns whether the file is gone afterwards.
pub(crate) async fn remove_if_matches(path: &Path, expected: &str) -> io::Result<bool> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content == expected => match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        },
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

/// Ownership of an acquired lock file.
///
/// Call [`LockGuard::release`] when done; if the guard is dropped without
/// being released (panic, cancelled future) the file is removed
/// synchronously in `Drop`. Either way the file is only deleted while it
/// still carries our stamp, so a lock reclaimed by another waiter survives.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    stamp: String,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(path: PathBuf, stamp: String) -> Self {
        Self {
            path,
            stamp,
            released: false,
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock.
    pub async fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_if_matches(&self.path, &self.stamp).await.map(|_| ())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            if content == self.stamp {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
