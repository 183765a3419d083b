//! Pluggable external cache.
//!
//! The registry client reads and writes package metadata through an
//! [`ExternalCache`] before touching the network, so several processes sharing
//! one backend fetch each package at most once per backend TTL.
//!
//! ```
//! use grabthar::cache::{ExternalCache, MemoryExternalCache};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let cache = MemoryExternalCache::new();
//! cache.set("grabthar_npm_info_pkg_npm", "{}".to_string()).await.unwrap();
//! assert!(cache.get("grabthar_npm_info_pkg_npm").await.unwrap().is_some());
//! # });
//! ```

mod memory;
mod traits;

pub use memory::MemoryExternalCache;
pub use traits::{BoxFuture, CacheError, ExternalCache};
