//! TTL-aware memoization of async computations.
//!
//! When several callers ask for the same key, only one computation runs and
//! every caller awaits the same shared future. Behaviour after it settles
//! depends on the TTL:
//!
//! - `ttl = None`: the entry is dropped as soon as the future settles, so only
//!   callers that overlap in time share work (in-flight deduplication).
//! - `ttl = Some(d)`: a successful result is served for `d` after the
//!   computation started.
//!
//! Failed computations are always evicted immediately so the next caller
//! retries.
//!
//! ```
//! use grabthar::memo::Memoizer;
//! use std::time::Duration;
//!
//! # tokio_test_block_on(async {
//! let memo: Memoizer<String, u32, String> = Memoizer::with_ttl(Duration::from_secs(30));
//! let value = memo
//!     .get_or_compute("answer".to_string(), || async { Ok(42) })
//!     .await;
//! assert_eq!(value, Ok(42));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct CacheEntry<V, E> {
    id: u64,
    result: SharedResult<V, E>,
    expiry: Option<Instant>,
}

impl<V, E> CacheEntry<V, E> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }
}

/// Memoizes async computations keyed by `K`.
pub struct Memoizer<K, V, E> {
    entries: Mutex<HashMap<K, CacheEntry<V, E>>>,
    ttl: Option<Duration>,
    next_id: AtomicU64,
}

impl<K, V, E> Memoizer<K, V, E>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Share only in-flight computations.
    pub fn in_flight() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: None,
            next_id: AtomicU64::new(0),
        }
    }

    /// Share results for `ttl` after each computation starts.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::in_flight()
        }
    }

    /// The configured TTL, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Return the memoized result for `key`, running `compute` if there is
    /// none (or it has expired).
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (id, shared) = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();

            match entries.get(&key) {
                Some(entry) if !entry.is_expired(now) => (entry.id, entry.result.clone()),
                _ => {
                    // Keys that are never asked for again would otherwise linger.
                    entries.retain(|_, entry| !entry.is_expired(now));
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = compute().boxed().shared();
                    entries.insert(
                        key.clone(),
                        CacheEntry {
                            id,
                            result: shared.clone(),
                            expiry: self.ttl.map(|ttl| now + ttl),
                        },
                    );
                    (id, shared)
                }
            }
        };

        let result = shared.await;

        if result.is_err() || self.ttl.is_none() {
            self.evict(&key, id);
        }

        result
    }

    /// Number of held entries. Expired ones are purged on the next insert.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no entries are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. In-flight computations keep running for the callers
    /// already awaiting them.
    pub fn reset(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Remove `key` only if it still refers to computation `id`; a newer
    /// computation for the same key must survive.
    fn evict(&self, key: &K, id: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting(
        counter: &Arc<AtomicUsize>,
        result: Result<u32, String>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, String>> {
        let counter = Arc::clone(counter);
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_computation() {
        let memo: Memoizer<&str, u32, String> = Memoizer::in_flight();
        let counter = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            memo.get_or_compute("k", counting(&counter, Ok(1))),
            memo.get_or_compute("k", counting(&counter, Ok(2))),
        );

        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(memo.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_entries_do_not_outlive_completion() {
        let memo: Memoizer<&str, u32, String> = Memoizer::in_flight();
        let counter = Arc::new(AtomicUsize::new(0));

        memo.get_or_compute("k", counting(&counter, Ok(1))).await.unwrap();
        memo.get_or_compute("k", counting(&counter, Ok(1))).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ttl_serves_settled_result() {
        let memo: Memoizer<&str, u32, String> = Memoizer::with_ttl(Duration::from_secs(30));
        let counter = Arc::new(AtomicUsize::new(0));

        assert_eq!(memo.get_or_compute("k", counting(&counter, Ok(7))).await, Ok(7));
        assert_eq!(memo.get_or_compute("k", counting(&counter, Ok(8))).await, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(memo.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_recomputes() {
        let memo: Memoizer<&str, u32, String> = Memoizer::with_ttl(Duration::from_millis(20));
        let counter = Arc::new(AtomicUsize::new(0));

        memo.get_or_compute("k", counting(&counter, Ok(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(memo.get_or_compute("k", counting(&counter, Ok(2))).await, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_purged_on_insert() {
        let memo: Memoizer<&str, u32, String> = Memoizer::with_ttl(Duration::from_millis(20));
        let counter = Arc::new(AtomicUsize::new(0));

        memo.get_or_compute("a", counting(&counter, Ok(1))).await.unwrap();
        memo.get_or_compute("b", counting(&counter, Ok(2))).await.unwrap();
        assert_eq!(memo.len(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        memo.get_or_compute("c", counting(&counter, Ok(3))).await.unwrap();
        assert_eq!(memo.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_evicted() {
        let memo: Memoizer<&str, u32, String> = Memoizer::with_ttl(Duration::from_secs(30));
        let counter = Arc::new(AtomicUsize::new(0));

        let first = memo
            .get_or_compute("k", counting(&counter, Err("boom".to_string())))
            .await;
        assert_eq!(first, Err("boom".to_string()));
        assert!(memo.is_empty());

        assert_eq!(memo.get_or_compute("k", counting(&counter, Ok(3))).await, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_compute_separately() {
        let memo: Memoizer<&str, u32, String> = Memoizer::with_ttl(Duration::from_secs(30));
        let counter = Arc::new(AtomicUsize::new(0));

        memo.get_or_compute("a", counting(&counter, Ok(1))).await.unwrap();
        memo.get_or_compute("b", counting(&counter, Ok(2))).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        memo.reset();
        assert!(memo.is_empty());
    }
}
