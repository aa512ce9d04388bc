// src/commands/install.rs
//! Package installation command

use super::progress::TerminalProgress;
use super::{env_file_path, print_warnings};
use anyhow::{Context, Result};
use setupkit::components::parse_component_list;
use setupkit::{
    HostSystem, InstallConfig, InstallEngine, PackageReader, ProgressTracker, RunOptions,
    Selection, SilentProgress,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options for `setupkit install`
pub struct InstallArgs<'a> {
    pub package: &'a str,
    pub root: Option<&'a str>,
    pub components: Option<&'a str>,
    pub all_components: bool,
    pub state_dir: &'a str,
    pub env_file: Option<&'a str>,
    pub program_timeout: Option<u64>,
    pub quiet: bool,
}

/// Install a package file
pub fn cmd_install(args: InstallArgs<'_>) -> Result<()> {
    let mut package = PackageReader::open(Path::new(args.package))
        .with_context(|| format!("Failed to open package {}", args.package))?;
    let manifest = package.manifest().clone();
    let state_dir = Path::new(args.state_dir);

    let mut config = InstallConfig::for_package(&manifest, state_dir)?;
    if let Some(root) = args.root {
        config = config.with_install_root(root);
    }
    if args.all_components {
        config = config.with_selection(Selection::all(&manifest.components));
    } else if let Some(list) = args.components {
        config = config.with_selection(Selection::from_names(parse_component_list(list)));
    }
    if let Some(secs) = args.program_timeout {
        config = config.with_program_timeout(Duration::from_secs(secs));
    }

    info!(
        "Installing {} {} into {}",
        manifest.name,
        manifest.version,
        config.install_root.display()
    );

    let env_file = env_file_path(state_dir, args.env_file);
    let mut host = HostSystem::open(&env_file)
        .with_context(|| format!("Failed to open environment file {}", env_file.display()))?;

    let progress: Arc<dyn ProgressTracker> = if args.quiet {
        Arc::new(SilentProgress::new())
    } else {
        Arc::new(TerminalProgress::install(&manifest.name))
    };
    let options = RunOptions::new().with_progress(progress);

    let report = InstallEngine::new(config, &mut host)
        .with_options(options)
        .install(&mut package)
        .with_context(|| format!("Failed to start install of {}", manifest.name))?;

    print_warnings(&report.warnings);
    if let Some(failure) = report.failure {
        println!(
            "Rolled back {} of {} actions",
            report.reversed, report.performed
        );
        return Err(anyhow::anyhow!(
            "Install of {} failed: {}",
            manifest.name,
            failure
        ));
    }

    println!(
        "Installed {} {} ({} actions)",
        manifest.name, manifest.version, report.performed
    );
    if !report.skipped.is_empty() {
        println!("Not selected:");
        for path in &report.skipped {
            println!("  {}", path);
        }
    }
    if let Some(log_path) = &report.log_path {
        println!("Uninstall log: {}", log_path.display());
    }
    Ok(())
}
