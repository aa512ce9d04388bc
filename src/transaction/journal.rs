// src/transaction/journal.rs

//! Append-only reversal log
//!
//! Every action an install performs on the target is recorded here before
//! the next record is processed, so the uninstall engine can undo the
//! install exactly. Each entry is one line with a CRC32 checksum:
//!
//! Format: `{crc32_hex}|{json}\n`
//!
//! Every append is fsynced. A crash can therefore only leave a torn final
//! line, which readers detect by its checksum and ignore along with
//! anything after it.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::package::ExternalCommand;

/// One line of the reversal log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogEntry {
    /// An install run started
    Begin {
        run_id: String,
        package: String,
        version: String,
        install_root: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// A directory was created (not logged when it already existed)
    CreateDirectory { path: PathBuf },

    /// A file was written
    CreateFile { path: PathBuf, size: u64 },

    /// A link or shortcut was created
    CreateLink { path: PathBuf, target: PathBuf },

    /// An environment variable was changed; `previous` is restored on undo
    SetEnvVar {
        variable: String,
        previous: Option<String>,
        value: String,
    },

    /// An external installer ran; its uninstaller runs on undo
    RunExternalUninstaller {
        name: String,
        command: ExternalCommand,
        timeout_secs: Option<u64>,
    },

    /// The install run completed
    Done {
        run_id: String,
        performed: usize,
        duration_ms: u64,
    },
}

impl LogEntry {
    /// Whether this entry records an action that can be reversed
    pub fn is_action(&self) -> bool {
        !matches!(self, Self::Begin { .. } | Self::Done { .. })
    }

    /// Target path of a file, directory or link entry
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::CreateDirectory { path }
            | Self::CreateFile { path, .. }
            | Self::CreateLink { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Short human-readable description
    pub fn describe(&self) -> String {
        match self {
            Self::Begin { package, version, .. } => format!("begin {} {}", package, version),
            Self::CreateDirectory { path } => format!("directory {}", path.display()),
            Self::CreateFile { path, .. } => format!("file {}", path.display()),
            Self::CreateLink { path, .. } => format!("link {}", path.display()),
            Self::SetEnvVar { variable, .. } => format!("environment {}", variable),
            Self::RunExternalUninstaller { name, .. } => format!("external uninstaller {}", name),
            Self::Done { run_id, .. } => format!("done {}", run_id),
        }
    }
}

/// Writer side of a reversal log
pub struct ReversalLog {
    path: PathBuf,
    file: File,
    /// File length before this run appended anything
    start_len: u64,
    appended: usize,
}

impl ReversalLog {
    /// Open a log for appending, creating it (and its directory) if needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let created = !path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                Error::IoError(format!(
                    "failed to open reversal log {}: {}",
                    path.display(),
                    e
                ))
            })?;
        let start_len = file.metadata()?.len();
        if created {
            // Persist the new directory entry along with the file
            sync_parent(path);
        }

        debug!(
            "Opened reversal log {} ({} bytes already present)",
            path.display(),
            start_len
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            start_len,
            appended: 0,
        })
    }

    /// Get the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended through this handle
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append an entry and fsync it
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| Error::IoError(format!("Failed to serialize log entry: {}", e)))?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.appended += 1;
        Ok(())
    }

    /// Drop everything this handle appended
    ///
    /// A log that was empty before this run is deleted.
    pub fn discard_appended(self) -> Result<()> {
        if self.start_len == 0 {
            drop(self.file);
            return delete(&self.path);
        }

        self.file.set_len(self.start_len)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// fsync the directory holding `path`
///
/// Errors are ignored; not every filesystem supports syncing a directory.
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

/// Read every intact entry of a log
///
/// Reading stops at the first line that is torn, fails its checksum or does
/// not parse; the entries before it are returned. Only failing to open or
/// read the file is an error.
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("reversal log {}", path.display()))
        } else {
            Error::IoError(format!(
                "failed to open reversal log {}: {}",
                path.display(),
                e
            ))
        }
    })?;

    let mut entries = Vec::new();
    for (line_num, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(entry) => entries.push(entry),
            None => {
                warn!(
                    "Reversal log {} is damaged at line {}; ignoring the rest",
                    path.display(),
                    line_num + 1
                );
                break;
            }
        }
    }

    Ok(entries)
}

fn parse_line(line: &[u8]) -> Option<LogEntry> {
    let line = std::str::from_utf8(line).ok()?;
    let (crc, json) = line.split_once('|')?;
    let expected = u32::from_str_radix(crc, 16).ok()?;
    if crc.len() != 8 || crc32fast::hash(json.as_bytes()) != expected {
        return None;
    }
    serde_json::from_str(json).ok()
}

/// Paths created by earlier runs recorded in the log at `path`
///
/// These may be overwritten by a reinstall without raising a collision.
pub fn prior_artifacts(path: &Path) -> Result<HashSet<PathBuf>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }

    Ok(read_entries(path)?
        .iter()
        .filter(|e| matches!(e, LogEntry::CreateFile { .. } | LogEntry::CreateLink { .. }))
        .filter_map(|e| e.path().map(Path::to_path_buf))
        .collect())
}

/// Delete a log file if it exists
pub fn delete(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            sync_parent(path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
