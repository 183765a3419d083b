//! Module details handed to watcher callers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::FallbackError;
use crate::paths::{installed_module_dir, manifest_path, node_modules_dir};

/// An installed dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDetails {
    pub version: String,
    pub path: PathBuf,
}

/// Where the current version of a watched module lives.
///
/// Produced once per successful poll cycle and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetails {
    /// `node_modules` directory holding the module and its dependencies.
    pub node_modules_path: PathBuf,
    /// Directory of the module itself.
    pub module_path: PathBuf,
    pub version: String,
    /// Version to roll back to.
    pub previous_version: String,
    pub dependencies: BTreeMap<String, DependencyDetails>,
}

impl ModuleDetails {
    /// Details of `name@version` installed into `prefix`.
    pub fn for_install(
        prefix: &Path,
        name: &str,
        version: &str,
        previous_version: &str,
        dependencies: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            node_modules_path: node_modules_dir(prefix),
            module_path: installed_module_dir(prefix, name),
            version: version.to_string(),
            previous_version: previous_version.to_string(),
            dependencies: dependencies
                .iter()
                .map(|(dep, dep_version)| {
                    (
                        dep.clone(),
                        DependencyDetails {
                            version: dep_version.clone(),
                            path: installed_module_dir(prefix, dep),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Directory containing `node_modules`, i.e. the install prefix.
    pub fn prefix(&self) -> &Path {
        self.node_modules_path
            .parent()
            .unwrap_or(&self.node_modules_path)
    }
}

/// The fields of `package.json` the watcher reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Read the manifest of the package in `module_dir`.
    pub async fn read(module_dir: &Path) -> Result<Self, FallbackError> {
        let path = manifest_path(module_dir);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FallbackError::Io {
                path: path.clone(),
                source: Arc::new(e),
            })?;
        serde_json::from_str(&content).map_err(|e| FallbackError::Manifest {
            path,
            reason: e.to_string(),
        })
    }

    /// Entry point relative to the package directory.
    pub fn main_entry(&self) -> &str {
        self.main
            .as_deref()
            .map(|main| main.trim_start_matches("./"))
            .filter(|main| !main.is_empty())
            .unwrap_or("index.js")
    }
}
