//! grabthar CLI - Command-line interface
//!
//! This binary provides a command-line interface to the grabthar library.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::info::InfoArgs;
use commands::install::InstallArgs;
use commands::resolve::ResolveArgs;
use commands::watch::WatchArgs;
use error::CliError;
use runner::{CliRunner, GlobalOptions};

#[derive(Parser)]
#[command(name = "grabthar")]
#[command(version = grabthar::VERSION)]
#[command(about = "Keep the live version of a published package installed locally", long_about = None)]
struct Cli {
    /// Primary registry URL (overrides config.ini)
    #[arg(long, global = true)]
    registry: Option<String>,

    /// CDN mirror tried before the primary registry (overrides config.ini)
    #[arg(long, global = true)]
    cdn_registry: Option<String>,

    /// Config file to use instead of ~/.grabthar/config.ini
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a package's dist-tags and published versions
    Info {
        /// Package name (e.g. my-module or @scope/my-module)
        name: String,

        /// Print the metadata document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which version would be live for a dist-tag
    Resolve {
        /// Package name
        name: String,

        /// Dist-tag to resolve
        #[arg(long, default_value = "latest")]
        tag: String,

        /// Treat this version as unstable (repeatable)
        #[arg(long = "unstable", value_name = "VERSION")]
        unstable: Vec<String>,
    },

    /// Install one version into the live module tree
    Install {
        /// Package name
        name: String,

        /// Exact version to install
        version: String,

        /// Also install the package's dependencies
        #[arg(long)]
        dependencies: bool,
    },

    /// Keep the live version installed, printing each new version until Ctrl-C
    Watch {
        /// Package name
        name: String,

        /// Dist-tag to watch (repeatable; defaults to config.ini)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        /// Seconds between registry polls
        #[arg(long)]
        period: Option<u64>,

        /// Also install the package's dependencies
        #[arg(long)]
        dependencies: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let global = GlobalOptions {
        registry: cli.registry,
        cdn_registry: cli.cdn_registry,
        config: cli.config,
    };
    let runner = CliRunner::new(&global)?;

    match cli.command {
        Commands::Info { name, json } => commands::info::run(InfoArgs { name, json }, &runner).await,
        Commands::Resolve {
            name,
            tag,
            unstable,
        } => {
            commands::resolve::run(
                ResolveArgs {
                    name,
                    tag,
                    unstable,
                },
                &runner,
            )
            .await
        }
        Commands::Install {
            name,
            version,
            dependencies,
        } => {
            commands::install::run(
                InstallArgs {
                    name,
                    version,
                    dependencies,
                },
                &runner,
            )
            .await
        }
        Commands::Watch {
            name,
            tags,
            period,
            dependencies,
        } => {
            commands::watch::run(
                WatchArgs {
                    name,
                    tags,
                    period,
                    dependencies,
                },
                &runner,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch_with_global_flags() {
        let cli = Cli::try_parse_from([
            "grabthar",
            "watch",
            "@scope/widget",
            "--tag",
            "latest",
            "--tag",
            "beta",
            "--period",
            "30",
            "--cdn-registry",
            "https://cdn.example.com/npm",
        ])
        .unwrap();

        assert_eq!(cli.cdn_registry.as_deref(), Some("https://cdn.example.com/npm"));
        match cli.command {
            Commands::Watch {
                name, tags, period, ..
            } => {
                assert_eq!(name, "@scope/widget");
                assert_eq!(tags, vec!["latest", "beta"]);
                assert_eq!(period, Some(30));
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_install_requires_version() {
        assert!(Cli::try_parse_from(["grabthar", "install", "widget"]).is_err());
    }
}
