//! Version resolution with operator-controlled rollback.
//!
//! Given a package document, a dist-tag and the stability markings, work out
//! which version should be live and which version to fall back to.
//!
//! Eligible versions are plain `X.Y.Z` releases in the same major line as the
//! tagged version, no newer than it, and not marked unstable. Marking the
//! tagged version unstable rolls every consumer back to the newest stable
//! version below it on their next poll.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use regex::Regex;
use semver::Version;
use thiserror::Error;

use crate::registry::PackageMetadata;

static RELEASE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+$").unwrap_or_else(|e| panic!("invalid version pattern: {e}"))
});

/// Whether `version` is a plain `X.Y.Z` release (no pre-release or build tag).
pub fn is_release_version(version: &str) -> bool {
    RELEASE_VERSION.is_match(version)
}

/// Operator verdict on a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    Unstable,
}

/// Shared, mutable stability markings.
///
/// Cloning yields another handle to the same map, so every poller of a
/// watcher sees a marking as soon as it is made. Unmarked versions are stable.
#[derive(Debug, Clone, Default)]
pub struct StabilityMap {
    inner: Arc<RwLock<HashMap<String, Stability>>>,
}

impl StabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_stable(&self, version: &str) {
        self.set(version, Stability::Stable);
    }

    pub fn mark_unstable(&self, version: &str) {
        self.set(version, Stability::Unstable);
    }

    pub fn get(&self, version: &str) -> Stability {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(version)
            .copied()
            .unwrap_or(Stability::Stable)
    }

    pub fn is_unstable(&self, version: &str) -> bool {
        self.get(version) == Stability::Unstable
    }

    fn set(&self, version: &str, stability: Stability) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(version.to_string(), stability);
    }
}

/// Outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// Version that should be live.
    pub version: String,
    /// Newest stable version below the tagged one, or the newest eligible
    /// version when there is none.
    pub previous_version: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionResolutionError {
    #[error("no dist-tag {tag} found for {name}")]
    NoTagFound { name: String, tag: String },

    #[error("dist-tag {tag} of {name} points at invalid version {version}")]
    InvalidVersion {
        name: String,
        tag: String,
        version: String,
    },

    #[error("no eligible versions of {name} at or below {version}")]
    NoEligibleVersions { name: String, version: String },

    #[error("{name}@{version} is unstable and has no stable version to fall back to")]
    NoFallback { name: String, version: String },
}

/// Resolve the live and previous version for `tag`.
pub fn resolve(
    metadata: &PackageMetadata,
    tag: &str,
    stability: &StabilityMap,
) -> Result<ResolvedVersion, VersionResolutionError> {
    let current_raw = metadata
        .dist_tag(tag)
        .ok_or_else(|| VersionResolutionError::NoTagFound {
            name: metadata.name.clone(),
            tag: tag.to_string(),
        })?;
    let current = Version::parse(current_raw).map_err(|_| VersionResolutionError::InvalidVersion {
        name: metadata.name.clone(),
        tag: tag.to_string(),
        version: current_raw.to_string(),
    })?;

    let mut candidates: Vec<(Version, &str)> = metadata
        .versions
        .keys()
        .filter(|v| is_release_version(v))
        .filter_map(|v| Version::parse(v).ok().map(|parsed| (parsed, v.as_str())))
        .filter(|(parsed, _)| parsed.major == current.major && *parsed <= current)
        .filter(|(_, raw)| !stability.is_unstable(raw))
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    if candidates.is_empty() {
        return Err(VersionResolutionError::NoEligibleVersions {
            name: metadata.name.clone(),
            version: current_raw.to_string(),
        });
    }

    // Re-check: a marking may have landed while the candidates were built.
    let previous = candidates
        .iter()
        .filter(|(_, raw)| !stability.is_unstable(raw))
        .find(|(parsed, _)| *parsed < current)
        .or_else(|| candidates.first())
        .map(|(_, raw)| raw.to_string());

    let version = if stability.is_unstable(current_raw) {
        previous
            .clone()
            .ok_or_else(|| VersionResolutionError::NoFallback {
                name: metadata.name.clone(),
                version: current_raw.to_string(),
            })?
    } else {
        current_raw.to_string()
    };

    Ok(ResolvedVersion {
        previous_version: previous.unwrap_or_else(|| version.clone()),
        version,
    })
}
