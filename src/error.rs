// src/error.rs

//! Error types for setupkit

use thiserror::Error;

/// Errors produced while authoring, installing or uninstalling packages
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O failure on the authoring or target system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure with additional context
    #[error("I/O error: {0}")]
    IoError(String),

    /// A target path (or authored node path) is already occupied
    #[error("Path collision: {0}")]
    PathCollision(String),

    /// The package header names a codec this build does not know
    #[error("Unsupported codec identifier: {0}")]
    UnsupportedCodec(u8),

    /// The record stream ended before (or ran past) its declared size
    #[error("Truncated record stream: declared {expected} bytes, read {actual}")]
    TruncatedStream { expected: u64, actual: u64 },

    /// An external uninstaller exited with a non-zero code
    #[error("External uninstaller {program} exited with code {code}")]
    ExternalUninstallerFailed { program: String, code: i32 },

    /// An external program could not be started or did not finish in time
    #[error("External program error: {0}")]
    ExternalProgram(String),

    /// The target of a reversal log entry no longer exists
    #[error("Reversal log target is missing: {0}")]
    MissingLogEntryTarget(String),

    /// Malformed package header or record
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// Invalid node or target path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path escapes the install root
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Link target does not resolve inside the package
    #[error("Invalid link target: {0}")]
    InvalidLinkTarget(String),

    /// Node lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// A file changed size between tree construction and sealing
    #[error("Source changed since it was scanned: {path} (expected {expected} bytes, found {actual})")]
    SourceChanged {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// A preinstall hook rejected the target system
    #[error("Preinstall check failed: {0}")]
    HookFailed(String),

    /// The run was cancelled by the caller
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Could not acquire the run lock
    #[error("Lock error: {0}")]
    LockError(String),

    /// Operation not permitted in the current engine state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Package description could not be loaded
    #[error("Package description error: {0}")]
    DescriptionError(String),
}

/// Result type for setupkit operations
pub type Result<T> = std::result::Result<T, Error>;
