// src/filesystem/mod.rs

//! Filesystem helpers shared by the install and uninstall engines

pub mod path;

pub use path::{sanitize_path, state_file_stem, target_path};
