// src/lib.rs

//! setupkit: package builder and reversible installer
//!
//! Builds a described tree of installable content (files, directories,
//! links, environment variable edits, grouped into selectable components)
//! into one compressed package, installs it while logging every action,
//! and replays that log backwards to uninstall.
//!
//! # Architecture
//!
//! - Content tree: arena of nodes with lazily inherited component tags
//! - Record stream: pre-order records plus payload bytes, compressed with
//!   a selectable codec behind a small header and CBOR manifest
//! - Install engine: state machine with write-ahead reversal log and
//!   rollback on failure or cancellation
//! - Uninstall engine: reverse replay of the log, tolerant of missing
//!   targets and crash-truncated logs

pub mod components;
pub mod compression;
pub mod description;
mod error;
pub mod filesystem;
pub mod package;
pub mod progress;
pub mod target;
pub mod transaction;
pub mod tree;

pub use components::{ComponentInfo, ComponentSet, FilterRule, RuleAction, RuleSet, Selection};
pub use compression::Codec;
pub use description::Description;
pub use error::{Error, Result};
pub use package::{Manifest, Package, PackageReader};
pub use progress::{CallbackProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress};
pub use target::{HostSystem, TargetSystem};
pub use transaction::{
    InstallConfig, InstallEngine, InstallReport, InstallState, RunOptions, UninstallConfig,
    UninstallEngine, UninstallReport, UninstallState,
};
pub use tree::{ContentTree, EnvMode, LinkTarget, NodeId, NodeKind};
