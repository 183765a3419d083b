//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::time::Duration;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [registry]
    if let Some(section) = ini.section(Some("registry")) {
        if let Some(v) = section.get("url") {
            config.registry.url = parse_url("registry", "url", v)?;
        }
        if let Some(v) = section.get("cdn_url") {
            let v = v.trim();
            if !v.is_empty() {
                config.registry.cdn_url = Some(parse_url("registry", "cdn_url", v)?);
            }
        }
        if let Some(v) = section.get("timeout") {
            config.registry.timeout_secs = parse_secs("registry", "timeout", v)?.as_secs();
        }
        if let Some(v) = section.get("info_cache_ttl") {
            config.registry.info_cache_ttl = parse_secs("registry", "info_cache_ttl", v)?;
        }
    }

    // [watcher]
    if let Some(section) = ini.section(Some("watcher")) {
        if let Some(v) = section.get("tags") {
            let tags = parse_list(v);
            if tags.is_empty() {
                return Err(invalid("watcher", "tags", v, "at least one tag is required"));
            }
            config.watcher.tags = tags;
        }
        if let Some(v) = section.get("period") {
            config.watcher.period = parse_secs("watcher", "period", v)?;
        }
        if let Some(v) = section.get("max_interval") {
            config.watcher.max_interval = parse_secs("watcher", "max_interval", v)?;
        }
        if let Some(v) = section.get("fallback") {
            config.watcher.fallback = parse_bool(v);
        }
        if let Some(v) = section.get("read_cache_capacity") {
            config.watcher.read_cache_capacity = v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    invalid("watcher", "read_cache_capacity", v, "expected a positive integer")
                })?;
        }
    }

    // [install]
    if let Some(section) = ini.section(Some("install")) {
        if let Some(v) = section.get("live_modules_dir") {
            let v = v.trim();
            if !v.is_empty() {
                config.install.live_modules_dir = Some(expand_tilde(v));
            }
        }
        if let Some(v) = section.get("dependencies") {
            config.install.dependencies = parse_bool(v);
        }
        if let Some(v) = section.get("child_modules") {
            let modules = parse_list(v);
            config.install.child_modules = (!modules.is_empty()).then_some(modules);
        }
        if let Some(v) = section.get("cleanup") {
            config.install.cleanup = parse_bool(v);
        }
        if let Some(v) = section.get("clean_interval") {
            config.install.clean_interval = parse_secs("install", "clean_interval", v)?;
        }
        if let Some(v) = section.get("clean_threshold") {
            config.install.clean_threshold = parse_secs("install", "clean_threshold", v)?;
        }
        if let Some(v) = section.get("lock_stale_after") {
            config.install.lock_stale_after = parse_secs("install", "lock_stale_after", v)?;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_url(section: &str, key: &str, value: &str) -> Result<String, ConfigFileError> {
    let value = value.trim();
    reqwest::Url::parse(value)
        .map(|_| value.trim_end_matches('/').to_string())
        .map_err(|e| invalid(section, key, value, &e.to_string()))
}

/// Parse a positive number of seconds.
fn parse_secs(section: &str, key: &str, value: &str) -> Result<Duration, ConfigFileError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(section, key, value, "expected a positive number of seconds"))
}

/// Parse a comma-separated list, dropping empty items.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a boolean value from a config string.
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive)
fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        std::fs::write(&path, content).unwrap();
        ConfigFile::load_from(&path)
    }

    #[test]
    fn test_full_config() {
        let config = load(
            r#"
[registry]
url = https://npm.example.com/
cdn_url = https://cdn.example.com/npm
timeout = 10

[watcher]
tags = latest, release
period = 20
fallback = no

[install]
dependencies = yes
child_modules = foo, bar
lock_stale_after = 120
"#,
        )
        .unwrap();

        assert_eq!(config.registry.url, "https://npm.example.com");
        assert_eq!(
            config.registry.cdn_url.as_deref(),
            Some("https://cdn.example.com/npm")
        );
        assert_eq!(config.registry.timeout_secs, 10);
        assert_eq!(config.watcher.tags, vec!["latest", "release"]);
        assert_eq!(config.watcher.period, Duration::from_secs(20));
        assert!(!config.watcher.fallback);
        assert!(config.install.dependencies);
        assert_eq!(
            config.install.child_modules,
            Some(vec!["foo".to_string(), "bar".to_string()])
        );
        assert_eq!(config.install.lock_stale_after, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_period() {
        let result = load("[watcher]\nperiod = soon\n");
        match result {
            Err(ConfigFileError::InvalidValue { section, key, .. }) => {
                assert_eq!(section, "watcher");
                assert_eq!(key, "period");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_registry_url() {
        assert!(load("[registry]\nurl = not a url\n").is_err());
    }

    #[test]
    fn test_empty_tags_rejected() {
        assert!(load("[watcher]\ntags = ,\n").is_err());
    }

    #[test]
    fn test_parse_bool_values() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool(" on "));
        assert!(!parse_bool("off"));
        assert!(!parse_bool("whatever"));
    }
}
