//! Package installation into version-scoped prefixes.
//!
//! ```text
//! {live_modules_dir}/{sanitized_name}_{version}/      <- prefix, locked during installs
//!     grabthar.lock
//!     node_modules/{name}/package.json
//!     node_modules/{dependency}/package.json
//! {live_modules_dir}/.grabthar_staging_{pid}_{token}/  <- per-install scratch space
//! ```
//!
//! A package is downloaded into a staging directory, extracted there, and
//! renamed into `node_modules/{name}`. Partial results are removed on failure,
//! and an existing manifest marks an install as complete.

mod archive;
mod error;
mod installer;

pub use error::InstallError;
pub use installer::{tarball_url, InstallOptions, Installer};
