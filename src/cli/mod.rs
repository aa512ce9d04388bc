// src/cli/mod.rs
//! CLI definitions for setupkit
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use setupkit::Codec;

/// Default directory for reversal logs, lock files and the environment file
pub const DEFAULT_STATE_DIR: &str = "/var/lib/setupkit";

#[derive(Parser)]
#[command(name = "setupkit")]
#[command(author = "Setupkit Contributors")]
#[command(version)]
#[command(about = "Build, install and cleanly uninstall component-based packages", long_about = None)]
pub struct Cli {
    /// Show debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a package from a description file
    Build {
        /// Path to the package description (setupkit.toml)
        #[arg(default_value = "setupkit.toml")]
        description: String,

        /// Output package path (default: <name>-<version>.skpg)
        #[arg(short, long)]
        output: Option<String>,

        /// Override the codec named in the description (store, deflate, bzip2)
        #[arg(long)]
        codec: Option<Codec>,
    },

    /// Show a package's metadata and contents
    Inspect {
        /// Path to the package file
        package: String,

        /// List every node with its effective components
        #[arg(long)]
        tree: bool,

        /// Print the manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install a package
    Install {
        /// Path to the package file
        package: String,

        /// Installation root (default: the package's default root)
        #[arg(short, long)]
        root: Option<String>,

        /// Comma separated components to install (default: the package defaults)
        #[arg(short, long, conflicts_with = "all_components")]
        components: Option<String>,

        /// Install every declared component
        #[arg(long)]
        all_components: bool,

        /// Directory holding reversal logs and lock files
        #[arg(long, default_value = DEFAULT_STATE_DIR)]
        state_dir: String,

        /// Environment file edited by environment variable nodes
        /// (default: <state-dir>/environment)
        #[arg(long)]
        env_file: Option<String>,

        /// Seconds to wait for external installers that set no timeout
        #[arg(long)]
        program_timeout: Option<u64>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Uninstall a package by replaying its reversal log
    Uninstall {
        /// Package name as given in its manifest
        #[arg(required_unless_present = "log")]
        package_name: Option<String>,

        /// Reversal log to replay instead of the one in the state directory
        #[arg(long)]
        log: Option<String>,

        /// Directory holding reversal logs and lock files
        #[arg(long, default_value = DEFAULT_STATE_DIR)]
        state_dir: String,

        /// Environment file edited by environment variable nodes
        /// (default: <state-dir>/environment)
        #[arg(long)]
        env_file: Option<String>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the actions recorded in a reversal log
    Log {
        /// Package name as given in its manifest
        package_name: String,

        /// Directory holding reversal logs and lock files
        #[arg(long, default_value = DEFAULT_STATE_DIR)]
        state_dir: String,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: clap_complete::Shell,
    },
}
