//! grabthar - keep a published package's live version installed locally
//!
//! This library polls an npm-compatible registry for the version a dist-tag
//! points at, installs it into a version-scoped directory, and hands callers
//! the location of whatever version is currently live.
//!
//! # High-Level API
//!
//! For most use cases, the [`watcher`] module provides a simplified facade:
//!
//! ```ignore
//! use grabthar::watcher::{Watcher, WatcherOptions, WatcherServices};
//!
//! let services = WatcherServices::reqwest(std::time::Duration::from_secs(30))?;
//! let watcher = Watcher::start(WatcherOptions::new("my-module"), services);
//!
//! let details = watcher.get(None).await?;
//! println!("{} is live at {}", details.version, details.module_path.display());
//! ```
//!
//! The building blocks are usable on their own: [`registry`] fetches
//! metadata, [`resolve`] picks a version, [`install`] places it on disk and
//! [`poll`] runs any fallible task on a backoff schedule.

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod http;
pub mod install;
pub mod lock;
pub mod log;
pub mod logging;
pub mod memo;
pub mod paths;
pub mod poll;
pub mod registry;
pub mod resolve;
pub mod watcher;

pub use watcher::{ModuleDetails, Watcher, WatcherError, WatcherOptions, WatcherServices};

/// Version of the grabthar library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
        assert!(semver::Version::parse(VERSION).is_ok());
    }
}
