//! Locally installed copies used when the live module is unavailable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::fs;

use super::details::{DependencyDetails, ModuleDetails, PackageManifest};
use super::error::FallbackError;
use crate::paths::{installed_module_dir, manifest_path, node_modules_dir};

/// Find `node_modules/{name}` in `root` or any of its ancestors and describe
/// it as module details.
///
/// Dependency versions come from the manifests Node would resolve from the
/// module directory. Declared dependencies that are not installed anywhere
/// are left out.
pub async fn discover(name: &str, root: &Path) -> Result<ModuleDetails, FallbackError> {
    let Some(base) = find_upward(root, name).await else {
        return Err(FallbackError::NotFound {
            name: name.to_string(),
            root: root.to_path_buf(),
        });
    };

    let module_path = installed_module_dir(&base, name);
    let manifest = PackageManifest::read(&module_path).await?;
    let version = manifest
        .version
        .clone()
        .ok_or_else(|| FallbackError::Manifest {
            path: manifest_path(&module_path),
            reason: "missing version".to_string(),
        })?;

    let mut dependencies = BTreeMap::new();
    for dependency in manifest.dependencies.keys() {
        let Some(dep_base) = find_upward(&module_path, dependency).await else {
            continue;
        };
        let path = installed_module_dir(&dep_base, dependency);
        // Unreadable dependency manifests are treated like missing ones.
        let Ok(dep_manifest) = PackageManifest::read(&path).await else {
            continue;
        };
        if let Some(version) = dep_manifest.version {
            dependencies.insert(dependency.clone(), DependencyDetails { version, path });
        }
    }

    Ok(ModuleDetails {
        node_modules_path: node_modules_dir(&base),
        module_path,
        previous_version: version.clone(),
        version,
        dependencies,
    })
}

/// Closest directory at or above `start` with `node_modules/{name}/package.json`.
async fn find_upward(start: &Path, name: &str) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = manifest_path(&installed_module_dir(dir, name));
        if fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(dir.to_path_buf());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_package(dir: &Path, name: &str, version: &str, deps: &[&str]) {
        std::fs::create_dir_all(dir).unwrap();
        let deps: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|d| (d.to_string(), serde_json::Value::from("^1.0.0")))
            .collect();
        let manifest = serde_json::json!({
            "name": name,
            "version": version,
            "dependencies": deps,
        });
        std::fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_discover_walks_upward() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        write_package(
            &app.join("node_modules/widget"),
            "widget",
            "2.0.0",
            &["foo", "nested", "missing"],
        );
        write_package(&app.join("node_modules/foo"), "foo", "1.2.3", &[]);
        write_package(
            &app.join("node_modules/widget/node_modules/nested"),
            "nested",
            "1.0.1",
            &[],
        );
        let start = app.join("src/deep/dir");
        std::fs::create_dir_all(&start).unwrap();

        let details = discover("widget", &start).await.unwrap();

        assert_eq!(details.version, "2.0.0");
        assert_eq!(details.previous_version, "2.0.0");
        assert_eq!(details.node_modules_path, app.join("node_modules"));
        assert_eq!(details.module_path, app.join("node_modules/widget"));
        assert_eq!(details.dependencies["foo"].version, "1.2.3");
        assert_eq!(
            details.dependencies["nested"].path,
            app.join("node_modules/widget/node_modules/nested")
        );
        assert!(!details.dependencies.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_discover_not_found() {
        let temp = TempDir::new().unwrap();
        let result = discover("grabthar-test-absent-module", temp.path()).await;
        assert!(matches!(result, Err(FallbackError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_discover_requires_version() {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("node_modules/widget");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join("package.json"), r#"{"name": "widget"}"#).unwrap();

        let result = discover("widget", temp.path()).await;
        assert!(matches!(result, Err(FallbackError::Manifest { .. })));
    }
}
