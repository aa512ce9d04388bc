// src/transaction/hooks.rs

//! Preinstall checks
//!
//! Hooks run before anything is written. A failing hook ends the run in
//! `Failed` without a rollback, since nothing needs undoing.

use std::path::Path;

use tracing::{debug, info};

use crate::components::Selection;
use crate::error::{Error, Result};
use crate::package::{Hook, HookCheck};
use crate::target::TargetSystem;

/// Run every hook whose components are selected
///
/// Relative `PathExists` paths are resolved against the install root.
/// Returns the number of hooks that ran.
pub fn run_preinstall_hooks(
    hooks: &[Hook],
    selection: &Selection,
    install_root: &Path,
    target: &dyn TargetSystem,
) -> Result<usize> {
    let mut ran = 0;
    for hook in hooks {
        if !selection.includes(&hook.components) {
            debug!("Skipping hook {}: components not selected", hook.name);
            continue;
        }

        let passed = match &hook.check {
            HookCheck::CommandAvailable { command } => target.command_available(command),
            HookCheck::PathExists { path } => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    install_root.join(path)
                };
                path.exists()
            }
            HookCheck::EnvVarSet { variable } => {
                target.env_var(variable)?.is_some() || std::env::var_os(variable).is_some()
            }
        };

        if !passed {
            let message = hook
                .message
                .clone()
                .unwrap_or_else(|| describe_failure(&hook.check));
            return Err(Error::HookFailed(format!("{}: {}", hook.name, message)));
        }

        info!("Preinstall check {} passed", hook.name);
        ran += 1;
    }
    Ok(ran)
}

fn describe_failure(check: &HookCheck) -> String {
    match check {
        HookCheck::CommandAvailable { command } => format!("command '{}' not found on PATH", command),
        HookCheck::PathExists { path } => format!("{} does not exist", path.display()),
        HookCheck::EnvVarSet { variable } => format!("environment variable {} is not set", variable),
    }
}
