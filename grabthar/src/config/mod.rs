//! Configuration for watchers, the registry client and the install tree.
//!
//! Library users normally build a [`crate::watcher::WatcherOptions`] directly.
//! [`ConfigFile`] covers hosts (and the CLI) that keep their settings in
//! `~/.grabthar/config.ini`:
//!
//! ```ini
//! [registry]
//! url = https://registry.npmjs.org
//! cdn_url = https://cdn.example.com/npm
//! timeout = 30
//!
//! [watcher]
//! tags = latest, release
//! period = 60
//! fallback = true
//!
//! [install]
//! dependencies = true
//! child_modules = foo, bar
//! ```

mod defaults;
mod file;
mod parser;
mod settings;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{ConfigFile, InstallSettings, RegistrySettings, WatcherSettings};
