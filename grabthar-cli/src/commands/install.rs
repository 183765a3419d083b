//! Install command - place one version into the live module tree.

use std::sync::Arc;

use grabthar::install::InstallOptions;
use grabthar::paths::{
    default_live_modules_root, installed_module_dir, live_modules_dir, module_prefix,
};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the install command.
pub struct InstallArgs {
    pub name: String,
    pub version: String,
    pub dependencies: bool,
}

/// Run the install command.
pub async fn run(args: InstallArgs, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("install");
    let config = runner.config();
    let registry_options = runner.registry_options();

    let client = runner.registry_client()?;
    let installer = runner.installer(Arc::clone(&client));
    let metadata = client.fetch_info(&args.name, &registry_options).await?;

    let root = config
        .install
        .live_modules_dir
        .clone()
        .unwrap_or_else(default_live_modules_root);
    let prefix = module_prefix(
        &live_modules_dir(&root, registry_options.cdn_registry.as_deref()),
        &args.name,
        &args.version,
    );

    let mut options = InstallOptions::new(registry_options)
        .with_dependencies(args.dependencies || config.install.dependencies);
    if let Some(children) = &config.install.child_modules {
        options = options.with_child_modules(children.clone());
    }

    println!("Installing {}@{}...", args.name, args.version);
    installer
        .install(&args.name, &args.version, metadata, &prefix, &options)
        .await?;

    println!(
        "Installed to {}",
        installed_module_dir(&prefix, &args.name).display()
    );
    Ok(())
}
