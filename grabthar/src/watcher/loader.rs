//! Module loading and import path resolution.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use libloading::Library;

use super::details::{ModuleDetails, PackageManifest};
use super::error::LoadError;
use crate::config::NODE_MODULES;

/// Turns a resolved file into something the host can use.
pub trait ModuleLoader: Send + Sync {
    type Module;

    fn load(&self, path: &Path) -> Result<Self::Module, LoadError>;
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|e| LoadError::Io {
        path: path.to_path_buf(),
        source: Arc::new(e),
    })
}

/// Parses the file as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLoader;

impl ModuleLoader for JsonLoader {
    type Module = serde_json::Value;

    fn load(&self, path: &Path) -> Result<Self::Module, LoadError> {
        let bytes = read_file(path)?;
        serde_json::from_slice(&bytes).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Returns the raw file content.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesLoader;

impl ModuleLoader for BytesLoader {
    type Module = Vec<u8>;

    fn load(&self, path: &Path) -> Result<Self::Module, LoadError> {
        read_file(path)
    }
}

/// Opens the file as a native shared library.
///
/// Libraries stay loaded for the lifetime of the loader; loading the same
/// canonical path twice returns the same handle.
#[derive(Default)]
pub struct DylibLoader {
    loaded: Mutex<HashMap<PathBuf, Arc<Library>>>,
}

impl DylibLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ModuleLoader for DylibLoader {
    type Module = Arc<Library>;

    fn load(&self, path: &Path) -> Result<Self::Module, LoadError> {
        let canonical = path.canonicalize().map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: Arc::new(e),
        })?;

        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(library) = loaded.get(&canonical) {
            return Ok(Arc::clone(library));
        }

        // SAFETY: running a library's initializers is inherent to loading
        // it; callers only import libraries published as the watched module.
        let library = unsafe { Library::new(&canonical) }.map_err(|e| LoadError::Library {
            path: canonical.clone(),
            reason: e.to_string(),
        })?;
        let library = Arc::new(library);
        loaded.insert(canonical, Arc::clone(&library));
        Ok(library)
    }
}

/// `path` with `.` and `..` folded away, or `None` if it is absolute or climbs
/// above the directory it is relative to.
pub fn contained_path(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

/// Paths an import of `path` may refer to, most specific first.
///
/// 1. A dependency's directory, when `path` starts with its name.
/// 2. The module directory.
/// 3. `node_modules/{path}` in the module directory and each ancestor up to
///    the install prefix.
pub fn import_candidates(details: &ModuleDetails, path: &str) -> Vec<PathBuf> {
    let path = path.trim_start_matches("./");
    let mut candidates = Vec::new();

    if let Some((dependency, rest)) = split_package_path(path) {
        if let Some(dep) = details.dependencies.get(dependency) {
            candidates.push(join_rest(&dep.path, rest));
        }
    }

    candidates.push(details.module_path.join(path));

    let prefix = details.prefix();
    for dir in details.module_path.ancestors() {
        if !dir.starts_with(prefix) {
            break;
        }
        // Nested node_modules never contain another node_modules level.
        if dir.file_name().is_some_and(|n| n == NODE_MODULES) {
            continue;
        }
        let candidate = dir.join(NODE_MODULES).join(path);
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates
}

/// Split `name/rest` or `@scope/name/rest` into package name and remainder.
fn split_package_path(path: &str) -> Option<(&str, &str)> {
    let segments = if path.starts_with('@') { 2 } else { 1 };
    let mut end = 0;
    for _ in 0..segments {
        let start = if end == 0 { 0 } else { end + 1 };
        if start > path.len() {
            return None;
        }
        end = match path[start..].find('/') {
            Some(i) => start + i,
            None => path.len(),
        };
    }
    if end == 0 {
        return None;
    }
    let rest = path.get(end + 1..).unwrap_or("");
    Some((&path[..end], rest))
}

fn join_rest(base: &Path, rest: &str) -> PathBuf {
    if rest.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

/// The file a candidate refers to, if it exists.
///
/// Directories resolve through their manifest's `main` entry, or `index.js`.
pub async fn resolve_entry(candidate: &Path) -> Option<PathBuf> {
    let metadata = tokio::fs::metadata(candidate).await.ok()?;
    if metadata.is_file() {
        return Some(candidate.to_path_buf());
    }
    if !metadata.is_dir() {
        return None;
    }

    let manifest = PackageManifest::read(candidate).await.unwrap_or_default();
    let entry = candidate.join(contained_path(manifest.main_entry())?);
    match tokio::fs::metadata(&entry).await {
        Ok(m) if m.is_file() => Some(entry),
        _ => None,
    }
}
