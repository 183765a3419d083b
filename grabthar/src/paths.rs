//! Naming and layout of the live module tree.
//!
//! ```text
//! {home}/__live_modules__/[{cdn_host}/]{sanitized_name}_{version}/node_modules/{name, deps...}
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{LIVE_MODULES_DIR_NAME, NODE_MODULES, PACKAGE_JSON};

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9]+").unwrap_or_else(|e| panic!("invalid sanitize pattern: {e}"))
});

static PREFIX_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+_\d+\.\d+\.\d+$")
        .unwrap_or_else(|e| panic!("invalid prefix pattern: {e}"))
});

/// Replace every run of non-alphanumeric characters with `_`.
///
/// ```
/// assert_eq!(grabthar::paths::sanitize("@scope/my-module"), "_scope_my_module");
/// ```
pub fn sanitize(value: &str) -> String {
    NON_ALPHANUMERIC.replace_all(value, "_").into_owned()
}

/// Package name with any `@scope/` prefix removed.
pub fn name_without_scope(name: &str) -> &str {
    match name.strip_prefix('@') {
        Some(rest) => rest.split_once('/').map(|(_, n)| n).unwrap_or(name),
        None => name,
    }
}

/// The user's home directory.
///
/// Falls back to `/home/$USER` when the platform lookup fails, and to the
/// system temp directory as a last resort.
pub fn home_directory() -> PathBuf {
    dirs::home_dir()
        .or_else(|| std::env::var("USER").ok().map(|user| Path::new("/home").join(user)))
        .unwrap_or_else(std::env::temp_dir)
}

/// Default root of the live module tree (`~/__live_modules__`).
pub fn default_live_modules_root() -> PathBuf {
    home_directory().join(LIVE_MODULES_DIR_NAME)
}

/// Directory holding live modules for a given registry source.
///
/// Modules fetched through a CDN mirror live under a per-host subdirectory so
/// mirrors never share installs with the primary registry.
pub fn live_modules_dir(root: &Path, cdn_registry: Option<&str>) -> PathBuf {
    match cdn_registry.and_then(cdn_host_label) {
        Some(label) => root.join(label),
        None => root.to_path_buf(),
    }
}

fn cdn_host_label(cdn_registry: &str) -> Option<String> {
    let url = reqwest::Url::parse(cdn_registry).ok()?;
    url.host_str().map(sanitize)
}

/// Version-scoped install prefix for a module.
pub fn module_prefix(live_modules_dir: &Path, name: &str, version: &str) -> PathBuf {
    live_modules_dir.join(format!("{}_{}", sanitize(name), version))
}

/// Whether a directory name has the shape [`module_prefix`] gives it.
///
/// Sanitized names never contain dots, so CDN host labels don't match.
pub fn is_module_prefix_name(name: &str) -> bool {
    PREFIX_NAME.is_match(name)
}

/// `node_modules` directory inside a prefix.
pub fn node_modules_dir(prefix: &Path) -> PathBuf {
    prefix.join(NODE_MODULES)
}

/// Installed location of a package inside a prefix.
pub fn installed_module_dir(prefix: &Path, name: &str) -> PathBuf {
    node_modules_dir(prefix).join(name)
}

/// Manifest path of a package directory.
pub fn manifest_path(module_dir: &Path) -> PathBuf {
    module_dir.join(PACKAGE_JSON)
}
