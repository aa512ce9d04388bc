// src/commands/uninstall.rs
//! Package uninstall command

use super::progress::TerminalProgress;
use super::{env_file_path, print_warnings};
use anyhow::{Context, Result};
use setupkit::{
    HostSystem, ProgressTracker, RunOptions, SilentProgress, UninstallConfig, UninstallEngine,
    UninstallState,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Uninstall a package by name, or by replaying a specific log
pub fn cmd_uninstall(
    package_name: Option<&str>,
    log: Option<&str>,
    state_dir: &str,
    env_file: Option<&str>,
    quiet: bool,
) -> Result<()> {
    let state_dir = Path::new(state_dir);
    let config = match (log, package_name) {
        (Some(log), _) => UninstallConfig::new(log),
        (None, Some(name)) => UninstallConfig::for_package(state_dir, name)?,
        (None, None) => {
            return Err(anyhow::anyhow!("Either a package name or --log is required"));
        }
    };
    let label = package_name.unwrap_or("package").to_string();

    if !config.log_path.exists() {
        return Err(anyhow::anyhow!(
            "No reversal log at {}; is {} installed?",
            config.log_path.display(),
            label
        ));
    }
    info!("Uninstalling {} using {}", label, config.log_path.display());

    let env_file = env_file_path(state_dir, env_file);
    let mut host = HostSystem::open(&env_file)
        .with_context(|| format!("Failed to open environment file {}", env_file.display()))?;

    let progress: Arc<dyn ProgressTracker> = if quiet {
        Arc::new(SilentProgress::new())
    } else {
        Arc::new(TerminalProgress::uninstall(&label))
    };

    let report = UninstallEngine::new(config, &mut host)
        .with_options(RunOptions::new().with_progress(progress))
        .run()
        .with_context(|| format!("Failed to uninstall {}", label))?;

    print_warnings(&report.warnings);
    println!(
        "Uninstalled {}: {} reversed, {} already gone, {} directories left in place",
        label, report.reversed, report.unresolved, report.skipped
    );
    if report.state == UninstallState::CompletedWithWarnings {
        println!("Completed with warnings");
    }
    Ok(())
}
