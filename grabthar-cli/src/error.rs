//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use grabthar::config::ConfigFileError;
use grabthar::http::TransportError;
use grabthar::install::InstallError;
use grabthar::registry::RegistryError;
use grabthar::resolve::VersionResolutionError;
use grabthar::watcher::WatcherError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to load the config file
    ConfigFile(ConfigFileError),
    /// Failed to create the HTTP client
    Transport(TransportError),
    /// Failed to fetch package metadata
    Registry(RegistryError),
    /// No version could be resolved
    Resolution(VersionResolutionError),
    /// Failed to install a package
    Install(InstallError),
    /// The watched module is unavailable
    Watch(WatcherError),
    /// Failed to wait for Ctrl-C
    Signal(std::io::Error),
    /// Failed to format command output
    Output(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::LoggingInit(_) | CliError::Config(_) | CliError::ConfigFile(_) => 2,
            CliError::Registry(_) | CliError::Transport(_) => 3,
            CliError::Resolution(_) => 4,
            CliError::Install(_) => 5,
            CliError::Watch(_) | CliError::Signal(_) | CliError::Output(_) => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::Registry(RegistryError::Status { status: 404, .. }) => {
                eprintln!();
                eprintln!("The package was not found. Check the name and --registry.");
            }
            CliError::Install(InstallError::InvalidDependencyVersion { .. }) => {
                eprintln!();
                eprintln!("Live modules must pin every dependency to an exact X.Y.Z version.");
            }
            CliError::ConfigFile(_) => {
                eprintln!();
                eprintln!(
                    "Fix the value in {} or remove the file to use defaults.",
                    grabthar::config::config_file_path().display()
                );
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Transport(e) => write!(f, "Failed to create HTTP client: {}", e),
            CliError::Registry(e) => write!(f, "Failed to fetch package metadata: {}", e),
            CliError::Resolution(e) => write!(f, "Failed to resolve version: {}", e),
            CliError::Install(e) => write!(f, "Failed to install: {}", e),
            CliError::Watch(e) => write!(f, "{}", e),
            CliError::Signal(e) => write!(f, "Failed to listen for Ctrl-C: {}", e),
            CliError::Output(msg) => write!(f, "Failed to format output: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Transport(e) => Some(e),
            CliError::Registry(e) => Some(e),
            CliError::Resolution(e) => Some(e),
            CliError::Install(e) => Some(e),
            CliError::Watch(e) => Some(e),
            CliError::Signal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Transport(e)
    }
}

impl From<RegistryError> for CliError {
    fn from(e: RegistryError) -> Self {
        CliError::Registry(e)
    }
}

impl From<VersionResolutionError> for CliError {
    fn from(e: VersionResolutionError) -> Self {
        CliError::Resolution(e)
    }
}

impl From<InstallError> for CliError {
    fn from(e: InstallError) -> Self {
        CliError::Install(e)
    }
}

impl From<WatcherError> for CliError {
    fn from(e: WatcherError) -> Self {
        CliError::Watch(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_kind() {
        let registry = CliError::from(RegistryError::Status {
            url: "https://registry.test/widget".to_string(),
            status: 404,
        });
        assert_eq!(registry.exit_code(), 3);
        assert!(registry.to_string().contains("Failed to fetch package metadata"));

        let resolution = CliError::from(VersionResolutionError::NoTagFound {
            name: "widget".to_string(),
            tag: "beta".to_string(),
        });
        assert_eq!(resolution.exit_code(), 4);
        assert!(std::error::Error::source(&resolution).is_some());

        assert_eq!(CliError::Config("bad".to_string()).exit_code(), 2);
    }
}
