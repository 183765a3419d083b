//! Package metadata as served by the registry, trimmed to what the engine
//! uses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a package's tarball lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
}

/// One published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Dependency name to version (or range) as published.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dist: Dist,
}

/// Snapshot of a package's registry document.
///
/// Unknown registry fields are dropped while parsing, which keeps cached
/// copies small. Field names follow the registry document so a serialized
/// snapshot parses back as-is from an external cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionInfo>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    /// Set when the document came from the CDN mirror rather than the
    /// primary registry.
    #[serde(rename = "fetchedFromCDNRegistry", default)]
    pub fetched_from_cdn: bool,
}

impl PackageMetadata {
    /// Version a dist-tag points at.
    pub fn dist_tag(&self, tag: &str) -> Option<&str> {
        self.dist_tags.get(tag).map(String::as_str)
    }

    pub fn version(&self, version: &str) -> Option<&VersionInfo> {
        self.versions.get(version)
    }

    /// Tarball URL of a published version.
    pub fn tarball(&self, version: &str) -> Option<&str> {
        self.version(version)?.dist.tarball.as_deref()
    }

    /// Declared dependencies of a published version.
    pub fn dependencies(&self, version: &str) -> Option<&BTreeMap<String, String>> {
        self.version(version).map(|info| &info.dependencies)
    }
}
