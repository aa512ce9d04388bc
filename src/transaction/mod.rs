// src/transaction/mod.rs

//! Reversible install and uninstall runs
//!
//! An install run materializes a package under an install root while
//! recording every action in a reversal log. An uninstall run replays that
//! log backwards. Key features:
//!
//! - **Write-ahead reversal log**: each action is logged and fsynced before
//!   it touches the target, so a crash never leaves an unrecorded change
//! - **Rollback**: any failure after the first mutation undoes this run's
//!   actions in reverse order
//! - **Exclusive runs**: a lock file next to the log serializes runs
//!
//! # Install Lifecycle
//!
//! ```text
//! NotStarted -> Preinstalling -> Installing -> PostInstalling -> Completed
//!                     |               |               |
//!                     |               +-> RollingBack <+
//!                     v                       |
//!                   Failed <------------------+
//! ```

mod hooks;
mod install;
mod journal;
mod uninstall;

pub use hooks::run_preinstall_hooks;
pub use install::InstallEngine;
pub use journal::{LogEntry, ReversalLog, prior_artifacts, read_entries};
pub use uninstall::{UndoOutcome, UninstallEngine, undo_entry};

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::debug;

use crate::components::Selection;
use crate::error::{Error, Result};
use crate::filesystem::state_file_stem;
use crate::package::Manifest;
use crate::progress::ProgressTracker;
use crate::target::DEFAULT_PROGRAM_TIMEOUT;

/// Default number of attempts to take the run lock
pub const DEFAULT_LOCK_RETRIES: u32 = 5;

/// Install state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum InstallState {
    /// Nothing has happened yet
    NotStarted,
    /// Running preinstall checks; nothing written yet
    Preinstalling,
    /// Materializing directories and files
    Installing,
    /// Applying environment edits, links and external installers
    PostInstalling,
    /// All actions performed and the log is durable
    Completed,
    /// Undoing this run's actions after a failure
    RollingBack,
    /// The run failed; the target is as it was before the run
    Failed,
}

impl InstallState {
    /// Whether the run has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a failure in this state requires rollback
    pub fn needs_rollback(&self) -> bool {
        matches!(self, Self::Installing | Self::PostInstalling)
    }
}

/// Terminal states of an uninstall run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum UninstallState {
    Completed,
    /// Finished, but some entries could not be reversed cleanly
    CompletedWithWarnings,
}

/// Where and how an install run happens
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Directory the package tree is materialized under
    pub install_root: PathBuf,
    /// Reversal log location
    pub log_path: PathBuf,
    /// Lock file held for the duration of the run
    pub lock_path: PathBuf,
    /// Components to install; `None` selects the manifest defaults
    pub selection: Option<Selection>,
    pub lock_retries: u32,
    /// Wait limit for external installers and uninstallers
    pub program_timeout: Duration,
}

impl InstallConfig {
    /// Create a config with the lock next to the log
    pub fn new(install_root: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        let log_path = log_path.into();
        Self {
            install_root: install_root.into(),
            lock_path: lock_path_for(&log_path),
            log_path,
            selection: None,
            lock_retries: DEFAULT_LOCK_RETRIES,
            program_timeout: DEFAULT_PROGRAM_TIMEOUT,
        }
    }

    /// Defaults for a package: its default root and a log under `state_dir`
    pub fn for_package(manifest: &Manifest, state_dir: &Path) -> Result<Self> {
        Ok(Self::new(
            manifest.default_root.clone(),
            log_path_for(state_dir, &manifest.name)?,
        ))
    }

    pub fn with_install_root(mut self, install_root: impl Into<PathBuf>) -> Self {
        self.install_root = install_root.into();
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_lock_retries(mut self, retries: u32) -> Self {
        self.lock_retries = retries;
        self
    }

    pub fn with_program_timeout(mut self, timeout: Duration) -> Self {
        self.program_timeout = timeout;
        self
    }
}

/// Where an uninstall run finds its log
#[derive(Debug, Clone)]
pub struct UninstallConfig {
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
    pub lock_retries: u32,
    pub program_timeout: Duration,
}

impl UninstallConfig {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        let log_path = log_path.into();
        Self {
            lock_path: lock_path_for(&log_path),
            log_path,
            lock_retries: DEFAULT_LOCK_RETRIES,
            program_timeout: DEFAULT_PROGRAM_TIMEOUT,
        }
    }

    /// The log an install of `package_name` writes under `state_dir`
    pub fn for_package(state_dir: &Path, package_name: &str) -> Result<Self> {
        Ok(Self::new(log_path_for(state_dir, package_name)?))
    }

    pub fn with_program_timeout(mut self, timeout: Duration) -> Self {
        self.program_timeout = timeout;
        self
    }
}

/// Reversal log path for a package under a state directory
pub fn log_path_for(state_dir: &Path, package_name: &str) -> Result<PathBuf> {
    Ok(state_dir.join(format!("{}.log", state_file_stem(package_name)?)))
}

/// Lock file path that sits next to a reversal log
pub fn lock_path_for(log_path: &Path) -> PathBuf {
    log_path.with_extension("lock")
}

/// Options for controlling run execution
#[derive(Default, Clone)]
pub struct RunOptions {
    /// Cancel token - set to true to request cancellation
    pub cancel: Option<Arc<AtomicBool>>,
    /// Progress tracker for reporting operation progress
    pub progress: Option<Arc<dyn ProgressTracker>>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cancel token
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set the progress tracker
    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return Cancelled error if cancellation requested
    fn check_cancelled(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(operation.to_string()))
        } else {
            Ok(())
        }
    }

    fn with_tracker(&self, f: impl FnOnce(&dyn ProgressTracker)) {
        if let Some(progress) = &self.progress {
            f(progress.as_ref());
        }
    }
}

/// Exclusive lock held for the whole of a run
///
/// Released when dropped, on every exit path.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock, retrying with exponential backoff
    ///
    /// Waits 100ms, 200ms, 400ms, ... between attempts.
    pub fn acquire(path: &Path, retries: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Error::LockError(format!("cannot open {}: {}", path.display(), e)))?;

        let attempts = retries.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired run lock {}", path.display());
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        let delay = Duration::from_millis(100 << attempt.min(10));
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        Err(Error::LockError(format!(
            "failed to lock {} after {} attempts; another install or uninstall may be running: {}",
            path.display(),
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released run lock {}", self.path.display());
    }
}

/// Structured summary of an install run
#[derive(Debug)]
pub struct InstallReport {
    pub state: InstallState,
    /// Actions performed (and logged) by this run
    pub performed: usize,
    /// Actions undone by rollback
    pub reversed: usize,
    /// Package-relative paths left out by component selection
    pub skipped: Vec<String>,
    pub warnings: Vec<String>,
    /// Why the run failed
    pub failure: Option<Error>,
    /// Reversal log, when one was written
    pub log_path: Option<PathBuf>,
}

impl InstallReport {
    fn new() -> Self {
        Self {
            state: InstallState::NotStarted,
            performed: 0,
            reversed: 0,
            skipped: Vec::new(),
            warnings: Vec::new(),
            failure: None,
            log_path: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == InstallState::Completed
    }
}

/// Structured summary of an uninstall run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub state: UninstallState,
    /// Entries undone
    pub reversed: usize,
    /// Entries whose target no longer existed
    pub unresolved: usize,
    /// Directories left in place because they were not empty
    pub skipped: usize,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_helpers() {
        assert!(InstallState::Completed.is_terminal());
        assert!(InstallState::Failed.is_terminal());
        assert!(!InstallState::RollingBack.is_terminal());
        assert!(InstallState::Installing.needs_rollback());
        assert!(!InstallState::Preinstalling.needs_rollback());
        assert_eq!(InstallState::PostInstalling.to_string(), "PostInstalling");
    }

    #[test]
    fn test_config_paths() {
        let manifest = Manifest::new("My App", "1.0", "/opt/my-app");
        let config = InstallConfig::for_package(&manifest, Path::new("/var/lib/setupkit")).unwrap();
        assert_eq!(config.install_root, PathBuf::from("/opt/my-app"));
        assert_eq!(
            config.log_path,
            PathBuf::from("/var/lib/setupkit/My_App.log")
        );
        assert_eq!(
            config.lock_path,
            PathBuf::from("/var/lib/setupkit/My_App.lock")
        );

        let uninstall = UninstallConfig::for_package(Path::new("/var/lib/setupkit"), "My App").unwrap();
        assert_eq!(uninstall.log_path, config.log_path);
    }

    #[test]
    fn test_run_lock_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("demo.lock");

        let lock = RunLock::acquire(&path, 1).unwrap();
        // fs2 locks are per open file description, so a second handle in
        // the same process conflicts
        let err = RunLock::acquire(&path, 2).unwrap_err();
        assert!(matches!(err, Error::LockError(_)));

        drop(lock);
        RunLock::acquire(&path, 1).unwrap();
    }

    #[test]
    fn test_cancel_token() {
        let cancel = Arc::new(AtomicBool::new(false));
        let options = RunOptions::new().with_cancel(cancel.clone());
        assert!(options.check_cancelled("install").is_ok());

        cancel.store(true, Ordering::Relaxed);
        assert!(matches!(
            options.check_cancelled("install"),
            Err(Error::Cancelled(_))
        ));
    }
}
