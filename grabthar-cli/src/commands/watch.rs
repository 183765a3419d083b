//! Watch command - keep a package's live version installed until Ctrl-C.

use std::time::Duration;

use grabthar::poll::PollerConfig;
use grabthar::watcher::{Watcher, WatcherOptions};
use tracing::info;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the watch command.
pub struct WatchArgs {
    pub name: String,
    /// Tags to watch (config tags when empty).
    pub tags: Vec<String>,
    /// Poll period in seconds (config period when unset).
    pub period: Option<u64>,
    pub dependencies: bool,
}

/// Run the watch command.
pub async fn run(args: WatchArgs, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("watch");
    let config = runner.config();

    let mut options = WatcherOptions::from_config(&args.name, config);
    if !args.tags.is_empty() {
        options = options.with_tags(args.tags.clone());
    }
    if let Some(period) = args.period {
        if period == 0 {
            return Err(CliError::Config("--period must be at least 1 second".to_string()));
        }
        options = options.with_poller(
            PollerConfig::new(Duration::from_secs(period))
                .with_max_interval(config.watcher.max_interval),
        );
    }
    if args.dependencies {
        options = options.with_dependencies(true);
    }

    let tags = options.tags.clone();
    let period = options.poller.period;
    let watcher = Watcher::start(options, runner.watcher_services()?);

    println!("Watching {} ({})", args.name, tags.join(", "));
    println!("Polling every {}s. Press Ctrl-C to stop.", period.as_secs());
    println!();

    let mut shown: Vec<Option<String>> = vec![None; tags.len()];
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            biased;

            signal = tokio::signal::ctrl_c() => {
                signal.map_err(CliError::Signal)?;
                break;
            }

            _ = ticker.tick() => {
                for (tag, last) in tags.iter().zip(shown.iter_mut()) {
                    match watcher.get(Some(tag)).await {
                        Ok(details) => {
                            if last.as_deref() != Some(details.version.as_str()) {
                                println!(
                                    "[{}] {} (previous {}) at {}",
                                    tag,
                                    details.version,
                                    details.previous_version,
                                    details.module_path.display()
                                );
                                *last = Some(details.version.clone());
                            }
                        }
                        Err(e) => eprintln!("[{}] {}", tag, e),
                    }
                }
            }
        }
    }

    info!("Stopping watcher");
    watcher.cancel();
    println!("Stopped.");
    Ok(())
}
