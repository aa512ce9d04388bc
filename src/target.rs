// src/target.rs

//! Target system capabilities
//!
//! Everything the install and uninstall engines do outside plain file and
//! directory writes goes through [`TargetSystem`]: environment variable
//! edits, links and launching external programs. [`HostSystem`] is the
//! implementation for the machine the installer runs on.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::error::{Error, Result};
use crate::package::ExternalCommand;
use crate::tree::EnvMode;

/// Default wait for an external program
pub const DEFAULT_PROGRAM_TIMEOUT: Duration = Duration::from_secs(600);

/// Separator used by append/prepend environment edits
#[cfg(unix)]
pub const LIST_SEPARATOR: char = ':';
#[cfg(not(unix))]
pub const LIST_SEPARATOR: char = ';';

/// Abstract environment, link and process capability
pub trait TargetSystem {
    /// Current persistent value of an environment variable
    fn env_var(&self, name: &str) -> Result<Option<String>>;

    /// Persistently set an environment variable
    fn set_env_var(&mut self, name: &str, value: &str) -> Result<()>;

    /// Persistently remove an environment variable
    fn remove_env_var(&mut self, name: &str) -> Result<()>;

    /// Create a link at `link` pointing to `target`
    fn create_link(&mut self, link: &Path, target: &Path) -> Result<()>;

    /// Remove a link created by [`TargetSystem::create_link`]
    fn remove_link(&mut self, link: &Path) -> Result<()>;

    /// Run a program to completion and return its exit code
    fn run_program(&mut self, command: &ExternalCommand, timeout: Duration) -> Result<i32>;

    /// Whether a program can be found on PATH
    fn command_available(&self, command: &str) -> bool {
        which::which(command).is_ok()
    }
}

/// The machine the installer runs on
///
/// Environment edits are persisted to a `KEY=value` file that login
/// scripts can source. The process environment is never modified.
#[derive(Debug)]
pub struct HostSystem {
    env_file: PathBuf,
    env: BTreeMap<String, String>,
}

impl HostSystem {
    /// Open (or start) the environment file at `env_file`
    pub fn open(env_file: impl Into<PathBuf>) -> Result<Self> {
        let env_file = env_file.into();
        let env = match fs::read_to_string(&env_file) {
            Ok(content) => parse_env_file(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "failed to read {}: {}",
                    env_file.display(),
                    e
                )));
            }
        };
        debug!(
            "Loaded {} environment entries from {}",
            env.len(),
            env_file.display()
        );
        Ok(Self { env_file, env })
    }

    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    /// Every persisted variable
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.env_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.env_file.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for (key, value) in &self.env {
                writeln!(file, "{}={}", key, value)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.env_file)?;
        Ok(())
    }
}

fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                warn!("Ignoring malformed environment line: {}", line);
                None
            }
        })
        .collect()
}

fn validate_var_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('=') || name.contains('\n') || name.contains('\0') {
        return Err(Error::InvalidPath(format!(
            "invalid environment variable name: {:?}",
            name
        )));
    }
    Ok(())
}

impl TargetSystem for HostSystem {
    fn env_var(&self, name: &str) -> Result<Option<String>> {
        Ok(self.env.get(name).cloned())
    }

    fn set_env_var(&mut self, name: &str, value: &str) -> Result<()> {
        validate_var_name(name)?;
        if value.contains('\n') {
            return Err(Error::InvalidPath(format!(
                "environment value for {} contains a newline",
                name
            )));
        }
        self.env.insert(name.to_string(), value.to_string());
        self.persist()
    }

    fn remove_env_var(&mut self, name: &str) -> Result<()> {
        if self.env.remove(name).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn create_link(&mut self, link: &Path, target: &Path) -> Result<()> {
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, link)?;

        // Without symlinks the link is a text file naming its target
        #[cfg(not(unix))]
        fs::write(link, target.to_string_lossy().as_bytes())?;

        Ok(())
    }

    fn remove_link(&mut self, link: &Path) -> Result<()> {
        match fs::symlink_metadata(link) {
            Ok(_) => {
                fs::remove_file(link)?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::MissingLogEntryTarget(link.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn run_program(&mut self, command: &ExternalCommand, timeout: Duration) -> Result<i32> {
        info!("Running {} {:?}", command.program, command.args);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ExternalProgram(format!("failed to spawn '{}': {}", command.program, e))
            })?;

        // Drain both pipes while waiting so a chatty program never blocks
        // on a full pipe buffer
        let stdout = child
            .stdout
            .take()
            .map(|pipe| drain_output(pipe, command.program.clone(), false));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| drain_output(pipe, command.program.clone(), true));

        match child.wait_timeout(timeout)? {
            Some(status) => {
                for reader in stdout.into_iter().chain(stderr) {
                    let _ = reader.join();
                }
                Ok(status.code().unwrap_or(-1))
            }
            None => {
                // Readers are left detached; a surviving grandchild may
                // still hold the pipes open
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::ExternalProgram(format!(
                    "'{}' timed out after {} seconds",
                    command.program,
                    timeout.as_secs()
                )))
            }
        }
    }
}

/// Log a child's output line by line on a background thread
fn drain_output<R: Read + Send + 'static>(
    pipe: R,
    program: String,
    is_stderr: bool,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end();
                    if is_stderr {
                        warn!("[{}] {}", program, text);
                    } else {
                        debug!("[{}] {}", program, text);
                    }
                }
            }
        }
    })
}

/// Combine an existing value with an edit
pub fn apply_env_mode(mode: EnvMode, existing: Option<&str>, value: &str) -> String {
    match (mode, existing) {
        (EnvMode::Set, _) | (_, None) => value.to_string(),
        (_, Some("")) => value.to_string(),
        (EnvMode::Append, Some(existing)) => format!("{}{}{}", existing, LIST_SEPARATOR, value),
        (EnvMode::Prepend, Some(existing)) => format!("{}{}{}", value, LIST_SEPARATOR, existing),
    }
}
