//! External cache trait definition.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Boxed future returned by object-safe async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors surfaced by an external cache backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The backend could not be reached or refused the operation.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned something other than a string value.
    #[error("invalid cache value for key {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Pluggable string key/value store shared across processes.
///
/// Hosts typically back this with memcached or redis; registry metadata is
/// stored as JSON under stable keys so every process sharing the backend can
/// skip the network round trip.
pub trait ExternalCache: Send + Sync {
    /// Look up `key`. A miss is `Ok(None)`, not an error.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>>;

    /// Store `value` under `key`, returning the stored value.
    fn set(&self, key: &str, value: String) -> BoxFuture<'_, Result<String, CacheError>>;
}
