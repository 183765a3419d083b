//! Info command - show a package's registry metadata.

use semver::Version;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the info command.
pub struct InfoArgs {
    pub name: String,
    /// Print the trimmed metadata document as JSON.
    pub json: bool,
}

/// Run the info command.
pub async fn run(args: InfoArgs, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("info");
    let client = runner.registry_client()?;
    let metadata = client
        .fetch_info(&args.name, &runner.registry_options())
        .await?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&*metadata).map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    let source = if metadata.fetched_from_cdn {
        runner
            .config()
            .registry
            .cdn_url
            .as_deref()
            .unwrap_or("CDN mirror")
    } else {
        runner.config().registry.url.as_str()
    };

    println!("{} (from {})", metadata.name, source);
    println!();
    println!("Dist-tags:");
    for (tag, version) in &metadata.dist_tags {
        println!("  {:<12} {}", tag, version);
    }
    println!();

    let mut versions: Vec<(Option<Version>, &str)> = metadata
        .versions
        .keys()
        .map(|v| (Version::parse(v).ok(), v.as_str()))
        .collect();
    versions.sort();
    println!("Versions ({}):", versions.len());
    for (_, version) in versions.iter().rev().take(20) {
        let deps = metadata
            .dependencies(version)
            .map(|d| d.len())
            .unwrap_or_default();
        println!("  {:<16} {} dependencies", version, deps);
    }
    if versions.len() > 20 {
        println!("  ... {} older", versions.len() - 20);
    }

    Ok(())
}
