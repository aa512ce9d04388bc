// src/commands/mod.rs
//! Command handlers for the setupkit CLI

mod build;
mod inspect;
mod install;
mod log;
pub mod progress;
mod uninstall;

pub use build::cmd_build;
pub use inspect::cmd_inspect;
pub use install::{InstallArgs, cmd_install};
pub use log::cmd_log;
pub use uninstall::cmd_uninstall;

use std::path::{Path, PathBuf};

/// Environment file name inside the state directory
const ENV_FILE_NAME: &str = "environment";

/// Environment file to edit: the override if given, else one in `state_dir`
fn env_file_path(state_dir: &Path, env_file: Option<&str>) -> PathBuf {
    env_file
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join(ENV_FILE_NAME))
}

/// Print non-fatal problems collected during a run
fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("Warnings:");
    for warning in warnings {
        println!("  - {}", warning);
    }
}

/// Format a byte count for display
fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
