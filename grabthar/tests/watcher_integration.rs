//! Integration tests for the live module pipeline.
//!
//! These tests drive the public API end to end against an in-memory registry:
//! - Registry fetch, version resolution and install through a `Watcher`
//! - CDN mirror failures falling back to the primary registry
//! - Repeat installs performing no network I/O
//! - Dependency version validation before any download
//! - Rolling back when a version is marked unstable

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use grabthar::cache::BoxFuture;
use grabthar::http::{HttpResponse, HttpTransport, TransportError};
use grabthar::install::{InstallError, InstallOptions, Installer};
use grabthar::lock::LockService;
use grabthar::log::{Logger, MemoryLogger};
use grabthar::poll::PollerConfig;
use grabthar::registry::{PackageMetadata, RegistryClient, RegistryOptions};
use grabthar::watcher::{Watcher, WatcherOptions, WatcherServices};

const REGISTRY: &str = "https://registry.test";
const CDN: &str = "https://cdn.test/npm";

// =============================================================================
// Test Helpers
// =============================================================================

/// Registry double keyed by URL without its query string.
#[derive(Default)]
struct FakeRegistry {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    requests: Mutex<Vec<String>>,
}

impl FakeRegistry {
    fn serve(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.into()));
    }

    /// Publish `name` with `(version, dependencies)` entries and `latest`.
    fn publish(&self, name: &str, versions: &[(&str, Vec<(&str, &str)>)], latest: &str) {
        let mut documents = Map::new();
        for (version, deps) in versions {
            let tarball = format!("{REGISTRY}/{name}/-/{name}-{version}.tgz");
            let dependencies: Map<String, Value> = deps
                .iter()
                .map(|(dep, v)| (dep.to_string(), Value::from(*v)))
                .collect();
            documents.insert(
                version.to_string(),
                json!({ "dependencies": dependencies, "dist": { "tarball": tarball } }),
            );
            self.serve(&tarball, 200, package_tarball(name, version, deps.as_slice()));
        }

        let document = json!({
            "name": name,
            "versions": documents,
            "dist-tags": { "latest": latest },
            "readme": "discarded",
        });
        self.serve(&format!("{REGISTRY}/{name}"), 200, document.to_string());
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl HttpTransport for FakeRegistry {
    fn get(&self, url: &str) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        self.requests.lock().unwrap().push(url.to_string());
        let route = url.split('?').next().unwrap_or(url);
        let response = match self.routes.lock().unwrap().get(route) {
            Some((status, body)) => HttpResponse::new(*status, body.clone()),
            None => HttpResponse::new(404, "not found"),
        };
        Box::pin(async move { Ok(response) })
    }
}

fn package_tarball(name: &str, version: &str, dependencies: &[(&str, &str)]) -> Vec<u8> {
    let deps: Map<String, Value> = dependencies
        .iter()
        .map(|(dep, v)| (dep.to_string(), Value::from(*v)))
        .collect();
    let manifest = json!({
        "name": name,
        "version": version,
        "main": "index.js",
        "dependencies": deps,
    })
    .to_string();
    let index = format!("module.exports = '{name}@{version}';");

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in [
        ("package/package.json", manifest.as_str()),
        ("package/index.js", index.as_str()),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// The `widget` fixture: 1.3.53 is latest and depends on foo@1.2.3.
fn widget_registry() -> Arc<FakeRegistry> {
    let registry = Arc::new(FakeRegistry::default());
    registry.publish(
        "widget",
        &[
            ("1.3.51", vec![]),
            ("1.3.52", vec![]),
            ("1.3.53", vec![("foo", "1.2.3")]),
            ("2.0.0-beta.1", vec![]),
        ],
        "1.3.53",
    );
    registry.publish("foo", &[("1.2.3", vec![])], "1.2.3");
    registry
}

fn watcher_options(live_root: &Path) -> WatcherOptions {
    WatcherOptions::new("widget")
        .with_registry(RegistryOptions::new(REGISTRY))
        .with_live_modules_root(live_root)
        .with_fallback(false)
        .with_cleanup(false)
}

fn installer(registry: &Arc<FakeRegistry>) -> (Installer, Arc<RegistryClient>) {
    let logger: Arc<dyn Logger> = Arc::new(MemoryLogger::new());
    let client = Arc::new(RegistryClient::new(registry.clone()).with_logger(Arc::clone(&logger)));
    let locks = Arc::new(LockService::new(Arc::clone(&logger)));
    (Installer::new(Arc::clone(&client), locks, logger), client)
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_watcher_installs_latest_with_dependencies() {
    let temp = TempDir::new().unwrap();
    let registry = widget_registry();
    let logger = Arc::new(MemoryLogger::new());

    let services = WatcherServices::new(registry.clone()).with_logger(logger.clone());
    let watcher = Watcher::start(
        watcher_options(temp.path()).with_dependencies(true),
        services,
    );

    let details = watcher.get(None).await.unwrap();

    assert_eq!(details.version, "1.3.53");
    assert_eq!(details.previous_version, "1.3.52");
    assert_eq!(details.dependencies["foo"].version, "1.2.3");

    let prefix = temp.path().join("widget_1.3.53");
    assert_eq!(details.node_modules_path, prefix.join("node_modules"));
    assert_eq!(details.module_path, prefix.join("node_modules/widget"));
    assert!(details.module_path.join("package.json").exists());
    assert!(details.dependencies["foo"].path.join("package.json").exists());
    assert!(logger.contains("grabthar_module_updated"));

    let main = watcher.read(None, None).await.unwrap();
    assert_eq!(main.as_str(), "module.exports = 'widget@1.3.53';");

    let foo = watcher
        .import(&grabthar::watcher::BytesLoader, Some("foo"), None)
        .await
        .unwrap();
    assert_eq!(foo, b"module.exports = 'foo@1.2.3';");
}

#[tokio::test]
async fn test_cdn_failure_falls_back_to_primary_registry() {
    let registry = widget_registry();
    registry.serve(&format!("{CDN}/widget/info.json"), 500, "upstream error");

    let logger = Arc::new(MemoryLogger::new());
    let client = RegistryClient::new(registry.clone()).with_logger(logger.clone());
    let options = RegistryOptions::new(REGISTRY).with_cdn_registry(CDN);

    let metadata: Arc<PackageMetadata> = client.fetch_info("widget", &options).await.unwrap();

    assert!(!metadata.fetched_from_cdn);
    assert_eq!(metadata.dist_tag("latest"), Some("1.3.53"));
    assert!(logger.contains("grabthar_cdn_registry_failure"));

    let requests = registry.requests();
    assert!(requests[0].starts_with(&format!("{CDN}/widget/info.json?cache-bust=")));
    assert_eq!(requests[1], format!("{REGISTRY}/widget"));
}

#[tokio::test]
async fn test_repeat_install_performs_no_network_io() {
    let temp = TempDir::new().unwrap();
    let registry = widget_registry();
    let (installer, client) = installer(&registry);
    let options = InstallOptions::new(RegistryOptions::new(REGISTRY)).with_dependencies(true);

    let metadata = client
        .fetch_info("widget", &options.registry)
        .await
        .unwrap();
    let prefix = temp.path().join("widget_1.3.53");

    installer
        .install("widget", "1.3.53", Arc::clone(&metadata), &prefix, &options)
        .await
        .unwrap();
    let after_first = registry.request_count();
    assert!(after_first >= 3, "expected metadata and tarball fetches");

    installer
        .install("widget", "1.3.53", metadata, &prefix, &options)
        .await
        .unwrap();
    assert_eq!(registry.request_count(), after_first);
}

#[tokio::test]
async fn test_invalid_dependency_version_fails_without_network() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::default());
    registry.publish("widget", &[("1.0.0", vec![("foo", "^1.2.0")])], "1.0.0");

    let (installer, _) = installer(&registry);
    let document = json!({
        "name": "widget",
        "versions": {
            "1.0.0": {
                "dependencies": { "foo": "^1.2.0" },
                "dist": { "tarball": format!("{REGISTRY}/widget/-/widget-1.0.0.tgz") }
            }
        },
        "dist-tags": { "latest": "1.0.0" }
    });
    let metadata: PackageMetadata = serde_json::from_value(document).unwrap();
    let options = InstallOptions::new(RegistryOptions::new(REGISTRY)).with_dependencies(true);

    let result = installer
        .install(
            "widget",
            "1.0.0",
            Arc::new(metadata),
            &temp.path().join("widget_1.0.0"),
            &options,
        )
        .await;

    match result {
        Err(InstallError::InvalidDependencyVersion {
            dependency, version, ..
        }) => {
            assert_eq!(dependency, "foo");
            assert_eq!(version, "^1.2.0");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(registry.request_count(), 0);
}

#[tokio::test]
async fn test_marking_unstable_rolls_back() {
    let temp = TempDir::new().unwrap();
    let registry = widget_registry();

    let options = watcher_options(temp.path())
        .with_poller(PollerConfig::new(Duration::from_millis(50)))
        .with_info_cache_ttl(Duration::ZERO);
    let watcher = Watcher::start(options, WatcherServices::new(registry.clone()));

    let details = watcher.get(None).await.unwrap();
    assert_eq!(details.version, "1.3.53");

    watcher.mark_unstable("1.3.53");

    let rolled_back = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let details = watcher.get(None).await.unwrap();
            if details.version != "1.3.53" {
                return details;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("watcher never rolled back");

    assert_eq!(rolled_back.version, "1.3.52");
    assert_eq!(rolled_back.previous_version, "1.3.52");
    assert!(temp
        .path()
        .join("widget_1.3.52/node_modules/widget/package.json")
        .exists());

    watcher.mark_stable("1.3.53");
    let restored = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let details = watcher.get(None).await.unwrap();
            if details.version == "1.3.53" {
                return details;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("watcher never restored the marked-stable version");
    assert_eq!(restored.previous_version, "1.3.52");

    watcher.cancel();
}

#[tokio::test]
async fn test_local_fallback_when_registry_is_down() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("app");
    let module = app.join("node_modules/widget");
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(
        module.join("package.json"),
        r#"{"name": "widget", "version": "1.3.40", "dependencies": {"foo": "1.2.0"}}"#,
    )
    .unwrap();
    let foo = app.join("node_modules/foo");
    std::fs::create_dir_all(&foo).unwrap();
    std::fs::write(foo.join("package.json"), r#"{"name": "foo", "version": "1.2.0"}"#).unwrap();

    let registry = Arc::new(FakeRegistry::default());
    registry.serve(&format!("{REGISTRY}/widget"), 503, "maintenance");

    let options = watcher_options(&temp.path().join("live"))
        .with_fallback(true)
        .with_fallback_root(app.join("src"));
    let watcher = Watcher::start(options, WatcherServices::new(registry));

    let details = watcher.get(None).await.unwrap();
    assert_eq!(details.version, "1.3.40");
    assert_eq!(details.module_path, module);
    assert_eq!(details.dependencies["foo"].version, "1.2.0");
    assert_eq!(details.dependencies["foo"].path, foo);
}
