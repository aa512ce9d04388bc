// src/transaction/install.rs

//! Install engine
//!
//! Consumes a package's record stream front to back and materializes it
//! under the install root. Every action is appended to the reversal log
//! (and fsynced) before it is carried out, so both rollback and a later
//! uninstall see every change that may have reached the target.
//!
//! Directories and files are written while the stream is read. Links and
//! environment edits are collected and applied in the post-install phase,
//! once every link target exists.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hooks::run_preinstall_hooks;
use super::journal::{self, LogEntry, ReversalLog};
use super::uninstall::{UndoTally, undo_entry};
use super::{InstallConfig, InstallReport, InstallState, RunLock, RunOptions};
use crate::components::{ComponentSet, Selection};
use crate::error::{Error, Result};
use crate::filesystem::target_path;
use crate::package::{Manifest, PackageReader, Record, RecordReader};
use crate::target::{TargetSystem, apply_env_mode};
use crate::tree::{EnvMode, LinkTarget};

/// Placeholder in environment values replaced by the install root
pub const INSTALL_ROOT_VAR: &str = "${INSTALL_ROOT}";

/// Position of a record in the tree being installed
struct Frame {
    rel: String,
    path: PathBuf,
    effective: ComponentSet,
    skipped: bool,
}

impl Frame {
    fn root(root: &Path, own: ComponentSet, selection: &Selection) -> Self {
        Self {
            rel: String::new(),
            path: root.to_path_buf(),
            skipped: !selection.includes(&own),
            effective: own,
        }
    }

    fn child(
        &self,
        root: &Path,
        name: &str,
        own: &ComponentSet,
        selection: &Selection,
    ) -> Result<Self> {
        let rel = if self.rel.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.rel, name)
        };
        let effective = if own.is_empty() {
            self.effective.clone()
        } else {
            own.clone()
        };

        Ok(Self {
            path: target_path(root, &rel)?,
            skipped: !selection.includes(&effective),
            rel,
            effective,
        })
    }
}

struct DeferredLink {
    rel: String,
    path: PathBuf,
    target: PathBuf,
    /// Target lives inside the package and must have been installed
    in_package: bool,
}

struct DeferredEnv {
    rel: String,
    variable: String,
    value: String,
    mode: EnvMode,
}

/// State of one install run after the reversal log is open
struct Run {
    id: String,
    log: ReversalLog,
    /// Actions logged by this run, in order
    performed: Vec<LogEntry>,
    /// Paths an earlier run created, which may be overwritten
    prior: HashSet<PathBuf>,
    /// Package paths present under the root after this run
    materialized: HashSet<PathBuf>,
    links: Vec<DeferredLink>,
    envs: Vec<DeferredEnv>,
}

/// Install engine: drives one package through the install state machine
///
/// # Example
///
/// ```ignore
/// use setupkit::package::PackageReader;
/// use setupkit::target::HostSystem;
/// use setupkit::transaction::{InstallConfig, InstallEngine};
///
/// let mut package = PackageReader::open(Path::new("demo.skpg"))?;
/// let config = InstallConfig::for_package(package.manifest(), state_dir)?;
/// let mut host = HostSystem::open(state_dir.join("environment"))?;
/// let report = InstallEngine::new(config, &mut host).install(&mut package)?;
/// ```
pub struct InstallEngine<'t> {
    config: InstallConfig,
    target: &'t mut dyn TargetSystem,
    options: RunOptions,
    state: InstallState,
}

impl<'t> InstallEngine<'t> {
    pub fn new(config: InstallConfig, target: &'t mut dyn TargetSystem) -> Self {
        Self {
            config,
            target,
            options: RunOptions::default(),
            state: InstallState::NotStarted,
        }
    }

    /// Set execution options (cancel token, progress tracker)
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the current state
    pub fn state(&self) -> InstallState {
        self.state
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    fn set_state(&mut self, state: InstallState) {
        debug!("Install state {} -> {}", self.state, state);
        self.state = state;
        self.options.with_tracker(|p| p.set_phase(&state.to_string()));
    }

    /// Run the install to a terminal state
    ///
    /// Failures inside the state machine are reported through
    /// `InstallReport::failure` with state `Failed`. An `Err` means the run
    /// could not start at all: the engine was already used, the run lock is
    /// held elsewhere, or the install root is unusable.
    pub fn install(&mut self, package: &mut PackageReader<'_>) -> Result<InstallReport> {
        if self.state != InstallState::NotStarted {
            return Err(Error::InvalidState(format!(
                "install engine already ran (state {})",
                self.state
            )));
        }

        let start = Instant::now();
        let manifest = package.manifest().clone();
        let selection = self
            .config
            .selection
            .clone()
            .unwrap_or_else(|| Selection::defaults(&manifest.components));
        let root = std::path::absolute(&self.config.install_root)?;

        let mut report = InstallReport::new();
        for name in selection.unknown(&manifest.components) {
            let message = format!("component {} is not declared by {}", name, manifest.name);
            warn!("{}", message);
            report.warnings.push(message);
        }

        let _lock = RunLock::acquire(&self.config.lock_path, self.config.lock_retries)?;
        info!(
            "Installing {} {} into {} (components: {:?})",
            manifest.name,
            manifest.version,
            root.display(),
            selection.components()
        );

        self.set_state(InstallState::Preinstalling);
        let mut run = match self.preinstall(&manifest, &selection, &root) {
            Ok(run) => run,
            Err(e) => return Ok(self.fail_without_rollback(report, e)),
        };
        report.log_path = Some(self.config.log_path.clone());

        let outcome = self.execute(package.records(), &manifest, &selection, &root, &mut run, &mut report);
        report.performed = run.performed.len();

        match outcome {
            Ok(()) => {
                self.set_state(InstallState::Completed);
                info!(
                    "Installed {} {} in {}ms: {} actions, {} skipped",
                    manifest.name,
                    manifest.version,
                    start.elapsed().as_millis(),
                    report.performed,
                    report.skipped.len()
                );
                report.state = InstallState::Completed;
                self.options
                    .with_tracker(|p| p.finish_with_message("Installation complete"));
            }
            Err(e) => {
                warn!("Install of {} failed: {}; rolling back", manifest.name, e);
                self.rollback(run, &mut report);
                if report.reversed < report.performed {
                    report.warnings.push(format!(
                        "rollback reversed {} of {} actions",
                        report.reversed, report.performed
                    ));
                }
                self.options.with_tracker(|p| p.finish_with_error(&e.to_string()));
                report.failure = Some(e);
                report.state = InstallState::Failed;
            }
        }

        Ok(report)
    }

    /// Checks and setup that happen before anything is written
    fn preinstall(&mut self, manifest: &Manifest, selection: &Selection, root: &Path) -> Result<Run> {
        let hooks = run_preinstall_hooks(&manifest.hooks, selection, root, &*self.target)?;
        debug!("{} preinstall checks passed", hooks);

        let prior = journal::prior_artifacts(&self.config.log_path)?;
        if !prior.is_empty() {
            info!(
                "Found {} paths from an earlier install in {}",
                prior.len(),
                self.config.log_path.display()
            );
        }

        let id = Uuid::new_v4().to_string();
        let mut log = ReversalLog::open(&self.config.log_path)?;
        let begin = LogEntry::Begin {
            run_id: id.clone(),
            package: manifest.name.clone(),
            version: manifest.version.clone(),
            install_root: root.to_path_buf(),
            timestamp: Utc::now(),
        };
        if let Err(e) = log.append(&begin) {
            let _ = log.discard_appended();
            return Err(e);
        }

        Ok(Run {
            id,
            log,
            performed: Vec::new(),
            prior,
            materialized: HashSet::new(),
            links: Vec::new(),
            envs: Vec::new(),
        })
    }

    fn fail_without_rollback(&mut self, mut report: InstallReport, error: Error) -> InstallReport {
        warn!("Install aborted before any change: {}", error);
        self.set_state(InstallState::Failed);
        self.options
            .with_tracker(|p| p.finish_with_error(&error.to_string()));
        report.state = InstallState::Failed;
        report.failure = Some(error);
        report
    }

    fn execute<R: Read>(
        &mut self,
        records: &mut RecordReader<R>,
        manifest: &Manifest,
        selection: &Selection,
        root: &Path,
        run: &mut Run,
        report: &mut InstallReport,
    ) -> Result<()> {
        let start = Instant::now();

        self.set_state(InstallState::Installing);
        self.install_records(records, selection, root, run, report)?;

        self.set_state(InstallState::PostInstalling);
        self.apply_environment(root, run)?;
        self.create_links(run, report)?;
        self.run_external_installers(manifest, selection, run)?;

        run.log.append(&LogEntry::Done {
            run_id: run.id.clone(),
            performed: run.performed.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Log an action before carrying it out
    fn record(&mut self, run: &mut Run, entry: LogEntry) -> Result<()> {
        run.log.append(&entry)?;
        debug!("Logged {}", entry.describe());
        run.performed.push(entry);
        Ok(())
    }

    fn skip(&self, frame: &Frame, parent_skipped: bool, report: &mut InstallReport) {
        // Only the top of a skipped subtree is reported
        if parent_skipped {
            return;
        }
        debug!("Skipping {} (components {:?})", frame.rel, frame.effective);
        self.options.with_tracker(|p| p.skipped(&frame.rel));
        report.skipped.push(frame.rel.clone());
    }

    fn install_records<R: Read>(
        &mut self,
        records: &mut RecordReader<R>,
        selection: &Selection,
        root: &Path,
        run: &mut Run,
        report: &mut InstallReport,
    ) -> Result<()> {
        let total = records.declared();
        self.options.with_tracker(|p| p.set_length(total));

        let mut stack: Vec<Frame> = Vec::new();
        while let Some(record) = records.next_record()? {
            if let Record::EndDirectory = record {
                stack.pop();
            } else {
                let frame = match stack.last() {
                    None => {
                        let own = record.components().cloned().unwrap_or_default();
                        Frame::root(root, own, selection)
                    }
                    Some(parent) => {
                        let own = record.components().cloned().unwrap_or_default();
                        parent.child(root, record.name(), &own, selection)?
                    }
                };
                let parent = stack.last().filter(|p| p.skipped).map(|p| p.path.clone());
                let parent_skipped = parent.is_some();

                if frame.skipped {
                    self.skip(&frame, parent_skipped, report);
                    if matches!(record, Record::Directory { .. }) {
                        stack.push(frame);
                    }
                } else {
                    match record {
                        Record::Directory { .. } => {
                            self.ensure_directory(&frame.path, run)?;
                            stack.push(frame);
                        }
                        Record::File { size, .. } => {
                            // A selected file under a deselected directory
                            if let Some(dir) = &parent {
                                self.ensure_directory(dir, run)?;
                            }
                            self.write_file(records, &frame, size, run)?;
                        }
                        Record::Link { target, .. } => {
                            let (target, in_package) = match target {
                                LinkTarget::Package(rel) => (target_path(root, rel)?, true),
                                LinkTarget::Absolute(path) => (path, false),
                            };
                            run.links.push(DeferredLink {
                                rel: frame.rel,
                                path: frame.path,
                                target,
                                in_package,
                            });
                        }
                        Record::EnvironmentVariable {
                            variable,
                            value,
                            mode,
                            ..
                        } => run.envs.push(DeferredEnv {
                            rel: frame.rel,
                            variable,
                            value,
                            mode,
                        }),
                        Record::EndDirectory => {}
                    }
                }
            }

            let position = records.consumed();
            self.options.with_tracker(|p| p.set_position(position));
            self.options.check_cancelled("install")?;
        }
        Ok(())
    }

    /// Create a directory and any missing ancestors, logging each one
    ///
    /// Directories that already exist are reused and not logged.
    fn ensure_directory(&mut self, path: &Path, run: &mut Run) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(dir) = current {
            match fs::metadata(dir) {
                Ok(meta) if meta.is_dir() => break,
                Ok(_) => {
                    return Err(Error::PathCollision(format!(
                        "{} exists and is not a directory",
                        dir.display()
                    )));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => missing.push(dir.to_path_buf()),
                Err(e) => return Err(e.into()),
            }
            current = dir.parent();
        }

        for dir in missing.into_iter().rev() {
            self.record(run, LogEntry::CreateDirectory { path: dir.clone() })?;
            fs::create_dir(&dir).map_err(|e| {
                Error::IoError(format!("failed to create {}: {}", dir.display(), e))
            })?;
            run.materialized.insert(dir);
        }
        run.materialized.insert(path.to_path_buf());
        Ok(())
    }

    fn write_file<R: Read>(
        &mut self,
        records: &mut RecordReader<R>,
        frame: &Frame,
        size: u64,
        run: &mut Run,
    ) -> Result<()> {
        let path = &frame.path;
        match fs::symlink_metadata(path) {
            Ok(meta) if !meta.is_dir() && run.prior.contains(path) => {
                debug!("Replacing {} from an earlier install", path.display());
                if meta.file_type().is_symlink() {
                    fs::remove_file(path)?;
                }
            }
            Ok(_) => {
                return Err(Error::PathCollision(format!(
                    "{} already exists",
                    path.display()
                )));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.record(
                    run,
                    LogEntry::CreateFile {
                        path: path.clone(),
                        size,
                    },
                )?;
            }
            Err(e) => return Err(e.into()),
        }

        let file = File::create(path)
            .map_err(|e| Error::IoError(format!("failed to create {}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);
        let written = records.copy_payload(&mut writer)?;
        writer
            .into_inner()
            .map_err(|e| Error::IoError(format!("failed to write {}: {}", path.display(), e)))?;

        debug!("Wrote {} ({} bytes)", frame.rel, written);
        run.materialized.insert(path.clone());
        Ok(())
    }

    fn apply_environment(&mut self, root: &Path, run: &mut Run) -> Result<()> {
        let root_str = root.to_string_lossy();
        for env in std::mem::take(&mut run.envs) {
            let value = env.value.replace(INSTALL_ROOT_VAR, &root_str);
            let previous = self.target.env_var(&env.variable)?;
            let new_value = apply_env_mode(env.mode, previous.as_deref(), &value);

            self.record(
                run,
                LogEntry::SetEnvVar {
                    variable: env.variable.clone(),
                    previous,
                    value: new_value.clone(),
                },
            )?;
            self.target.set_env_var(&env.variable, &new_value)?;
            info!("Set {} ({}) from {}", env.variable, env.mode, env.rel);
            self.options.check_cancelled("environment")?;
        }
        Ok(())
    }

    fn create_links(&mut self, run: &mut Run, report: &mut InstallReport) -> Result<()> {
        for link in std::mem::take(&mut run.links) {
            if link.in_package && !run.materialized.contains(&link.target) {
                let message = format!(
                    "link {} not created: {} was not installed",
                    link.rel,
                    link.target.display()
                );
                warn!("{}", message);
                self.options.with_tracker(|p| p.skipped(&link.rel));
                report.skipped.push(link.rel.clone());
                report.warnings.push(message);
                continue;
            }
            if let Some(dir) = link.path.parent() {
                self.ensure_directory(dir, run)?;
            }

            match fs::symlink_metadata(&link.path) {
                Ok(meta) if !meta.is_dir() && run.prior.contains(&link.path) => {
                    debug!("Replacing link {} from an earlier install", link.path.display());
                    self.target.remove_link(&link.path)?;
                }
                Ok(_) => {
                    return Err(Error::PathCollision(format!(
                        "{} already exists",
                        link.path.display()
                    )));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.record(
                        run,
                        LogEntry::CreateLink {
                            path: link.path.clone(),
                            target: link.target.clone(),
                        },
                    )?;
                }
                Err(e) => return Err(e.into()),
            }

            self.target.create_link(&link.path, &link.target)?;
            debug!("Linked {} -> {}", link.rel, link.target.display());
            self.options.check_cancelled("links")?;
        }
        Ok(())
    }

    fn run_external_installers(
        &mut self,
        manifest: &Manifest,
        selection: &Selection,
        run: &mut Run,
    ) -> Result<()> {
        for external in &manifest.external {
            if !selection.includes(&external.components) {
                debug!("Skipping external installer {}", external.name);
                continue;
            }

            let timeout = external
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.config.program_timeout);

            self.record(
                run,
                LogEntry::RunExternalUninstaller {
                    name: external.name.clone(),
                    command: external.uninstall.clone(),
                    timeout_secs: external.timeout_secs,
                },
            )?;

            if let Some(install) = &external.install {
                let code = self.target.run_program(install, timeout)?;
                if code != 0 {
                    return Err(Error::ExternalProgram(format!(
                        "installer {} exited with code {}",
                        external.name, code
                    )));
                }
            }
            info!("External installer {} done", external.name);
            self.options.check_cancelled("external installers")?;
        }
        Ok(())
    }

    /// Undo this run's actions in reverse order and drop them from the log
    fn rollback(&mut self, run: Run, report: &mut InstallReport) {
        self.set_state(InstallState::RollingBack);

        let mut tally = UndoTally::default();
        for entry in run.performed.iter().rev() {
            if let Some(outcome) = undo_entry(entry, self.target, self.config.program_timeout) {
                tally.record(entry, outcome);
            }
        }

        if let Err(e) = run.log.discard_appended() {
            report
                .warnings
                .push(format!("failed to clean up the reversal log: {}", e));
        }

        info!(
            "Rolled back {} actions ({} already absent, {} left in place)",
            tally.reversed, tally.unresolved, tally.skipped
        );
        // Write-ahead entries whose action never happened come back unresolved
        report.reversed = tally.reversed + tally.unresolved;
        report.warnings.extend(tally.warnings);
        self.set_state(InstallState::Failed);
    }
}
