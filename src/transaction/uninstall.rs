// src/transaction/uninstall.rs

//! Reversal log replay
//!
//! Undoes logged actions from last to first. Per-entry problems never stop
//! the replay: a missing target is counted as unresolved, a non-empty
//! directory is left in place, and a failing external uninstaller becomes a
//! warning. Only failing to read the log aborts the run.

use std::fs;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::journal::{self, LogEntry};
use super::{RunLock, RunOptions, UninstallConfig, UninstallReport, UninstallState};
use crate::error::{Error, Result};
use crate::target::TargetSystem;

/// Result of undoing one log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    Reversed,
    /// The target no longer existed
    Unresolved(String),
    /// Deliberately left in place (non-empty directory)
    Skipped(String),
    /// Attempted but failed; replay continues
    Warning(String),
}

/// Undo a single action entry
///
/// Returns `None` for entries that are not actions (`Begin`, `Done`).
pub fn undo_entry(
    entry: &LogEntry,
    target: &mut dyn TargetSystem,
    default_timeout: Duration,
) -> Option<UndoOutcome> {
    let outcome = match entry {
        LogEntry::Begin { .. } | LogEntry::Done { .. } => return None,

        LogEntry::CreateFile { path, .. } => match fs::remove_file(path) {
            Ok(()) => UndoOutcome::Reversed,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                UndoOutcome::Unresolved(Error::MissingLogEntryTarget(path.display().to_string()).to_string())
            }
            Err(e) => UndoOutcome::Warning(format!("cannot remove {}: {}", path.display(), e)),
        },

        LogEntry::CreateDirectory { path } => match fs::read_dir(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                UndoOutcome::Unresolved(Error::MissingLogEntryTarget(path.display().to_string()).to_string())
            }
            Err(e) => UndoOutcome::Warning(format!("cannot read {}: {}", path.display(), e)),
            Ok(mut children) => {
                if children.next().is_some() {
                    UndoOutcome::Skipped(format!("{} is not empty", path.display()))
                } else {
                    match fs::remove_dir(path) {
                        Ok(()) => UndoOutcome::Reversed,
                        Err(e) => UndoOutcome::Warning(format!(
                            "cannot remove {}: {}",
                            path.display(),
                            e
                        )),
                    }
                }
            }
        },

        LogEntry::CreateLink { path, .. } => match target.remove_link(path) {
            Ok(()) => UndoOutcome::Reversed,
            Err(e @ Error::MissingLogEntryTarget(_)) => UndoOutcome::Unresolved(e.to_string()),
            Err(e) => UndoOutcome::Warning(format!("cannot remove link {}: {}", path.display(), e)),
        },

        LogEntry::SetEnvVar {
            variable, previous, ..
        } => {
            let restored = match previous {
                Some(value) => target.set_env_var(variable, value),
                None => target.remove_env_var(variable),
            };
            match restored {
                Ok(()) => UndoOutcome::Reversed,
                Err(e) => UndoOutcome::Warning(format!("cannot restore {}: {}", variable, e)),
            }
        }

        LogEntry::RunExternalUninstaller {
            name,
            command,
            timeout_secs,
        } => {
            let timeout = timeout_secs.map(Duration::from_secs).unwrap_or(default_timeout);
            match target.run_program(command, timeout) {
                Ok(0) => UndoOutcome::Reversed,
                Ok(code) => UndoOutcome::Warning(
                    Error::ExternalUninstallerFailed {
                        program: command.program.clone(),
                        code,
                    }
                    .to_string(),
                ),
                Err(e) => UndoOutcome::Warning(format!("uninstaller {} failed: {}", name, e)),
            }
        }
    };
    Some(outcome)
}

/// Running totals of undo outcomes
#[derive(Debug, Default)]
pub(crate) struct UndoTally {
    pub reversed: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl UndoTally {
    pub fn record(&mut self, entry: &LogEntry, outcome: UndoOutcome) {
        match outcome {
            UndoOutcome::Reversed => {
                debug!("Reversed {}", entry.describe());
                self.reversed += 1;
            }
            UndoOutcome::Unresolved(reason) => {
                info!("Already gone: {}", reason);
                self.unresolved += 1;
            }
            UndoOutcome::Skipped(reason) => {
                info!("Left in place: {}", reason);
                self.skipped += 1;
            }
            UndoOutcome::Warning(message) => {
                warn!("{}", message);
                self.warnings.push(message);
            }
        }
    }
}

/// Uninstall engine: replays a reversal log backwards
pub struct UninstallEngine<'t> {
    config: UninstallConfig,
    target: &'t mut dyn TargetSystem,
    options: RunOptions,
}

impl<'t> UninstallEngine<'t> {
    pub fn new(config: UninstallConfig, target: &'t mut dyn TargetSystem) -> Self {
        Self {
            config,
            target,
            options: RunOptions::default(),
        }
    }

    /// Set execution options (progress tracker)
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Undo every action in the log, then delete the log
    pub fn run(&mut self) -> Result<UninstallReport> {
        let start = Instant::now();
        let _lock = RunLock::acquire(&self.config.lock_path, self.config.lock_retries)?;

        let entries = journal::read_entries(&self.config.log_path)?;
        let actions: Vec<&LogEntry> = entries.iter().filter(|e| e.is_action()).collect();
        let completed_runs = entries
            .iter()
            .filter(|e| matches!(e, LogEntry::Done { .. }))
            .count();
        info!(
            "Uninstalling from {} ({} actions, {} completed runs)",
            self.config.log_path.display(),
            actions.len(),
            completed_runs
        );

        self.options.with_tracker(|p| {
            p.set_phase("Uninstalling");
            p.set_length(actions.len() as u64);
        });

        let mut tally = UndoTally::default();
        for (done, entry) in actions.iter().rev().enumerate() {
            if let Some(outcome) = undo_entry(entry, self.target, self.config.program_timeout) {
                if let UndoOutcome::Warning(message) = &outcome {
                    self.options.with_tracker(|p| p.warning(message));
                }
                tally.record(entry, outcome);
            }
            self.options
                .with_tracker(|p| p.set_position(done as u64 + 1));
        }

        journal::delete(&self.config.log_path)?;

        let state = if tally.unresolved == 0 && tally.warnings.is_empty() {
            UninstallState::Completed
        } else {
            UninstallState::CompletedWithWarnings
        };
        let report = UninstallReport {
            state,
            reversed: tally.reversed,
            unresolved: tally.unresolved,
            skipped: tally.skipped,
            warnings: tally.warnings,
        };

        info!(
            "Uninstall {} in {}ms: {} reversed, {} unresolved, {} skipped, {} warnings",
            report.state,
            start.elapsed().as_millis(),
            report.reversed,
            report.unresolved,
            report.skipped,
            report.warnings.len()
        );
        self.options
            .with_tracker(|p| p.finish_with_message(&report.state.to_string()));
        Ok(report)
    }
}
