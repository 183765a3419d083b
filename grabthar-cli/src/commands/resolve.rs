//! Resolve command - show which version would be live for a tag.

use grabthar::resolve::{resolve, StabilityMap};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the resolve command.
pub struct ResolveArgs {
    pub name: String,
    pub tag: String,
    /// Versions to treat as unstable.
    pub unstable: Vec<String>,
}

/// Run the resolve command.
pub async fn run(args: ResolveArgs, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("resolve");
    let client = runner.registry_client()?;
    let metadata = client
        .fetch_info(&args.name, &runner.registry_options())
        .await?;

    let stability = StabilityMap::new();
    for version in &args.unstable {
        stability.mark_unstable(version);
    }

    let resolved = resolve(&metadata, &args.tag, &stability)?;

    println!("{}@{}", args.name, args.tag);
    println!("  version:          {}", resolved.version);
    println!("  previous version: {}", resolved.previous_version);
    if let Some(tagged) = metadata.dist_tag(&args.tag) {
        if tagged != resolved.version {
            println!("  (tag points at {}, which is marked unstable)", tagged);
        }
    }

    Ok(())
}
