//! Registry client errors.

use thiserror::Error;

/// Errors raised while fetching package metadata.
///
/// All variants are cheap to clone so a single failed fetch can be handed to
/// every caller that was sharing it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The request never produced a response.
    #[error("registry request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The registry answered with a non-2xx status.
    #[error("registry returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The body was not a package document.
    #[error("malformed package metadata from {url}: {reason}")]
    Parse { url: String, reason: String },

    /// The external cache failed or held an unreadable entry.
    #[error("external cache error for {key}: {reason}")]
    Cache { key: String, reason: String },
}
