// src/commands/log.rs
//! Reversal log listing

use anyhow::{Context, Result};
use setupkit::transaction::{LogEntry, log_path_for, read_entries};
use std::path::Path;

/// List the runs and actions recorded for an installed package
pub fn cmd_log(package_name: &str, state_dir: &str) -> Result<()> {
    let log_path = log_path_for(Path::new(state_dir), package_name)?;
    let entries = read_entries(&log_path)
        .with_context(|| format!("Failed to read reversal log {}", log_path.display()))?;

    println!("{}", log_path.display());
    for entry in &entries {
        match entry {
            LogEntry::Begin {
                run_id,
                version,
                install_root,
                timestamp,
                ..
            } => println!(
                "run {} ({} into {}, {})",
                run_id,
                version,
                install_root.display(),
                timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            LogEntry::Done {
                performed,
                duration_ms,
                ..
            } => println!("  completed: {} actions in {}ms", performed, duration_ms),
            action => println!("  {}", action.describe()),
        }
    }

    if !matches!(entries.last(), Some(LogEntry::Done { .. })) {
        println!("  (last run did not complete)");
    }
    Ok(())
}
