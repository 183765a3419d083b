//! Package registry access.
//!
//! [`RegistryClient::fetch_info`] returns a trimmed [`PackageMetadata`]
//! snapshot for a package, consulting an optional external cache, an optional
//! CDN mirror, the primary registry and finally a stale in-process copy.

mod client;
mod error;
mod types;

pub use client::{cdn_info_url, info_cache_key, registry_url, RegistryClient, RegistryOptions};
pub use error::RegistryError;
pub use types::{Dist, PackageMetadata, VersionInfo};
