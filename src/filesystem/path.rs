// src/filesystem/path.rs

//! Path handling for install targets
//!
//! Package paths come from a package file, which is untrusted input. Every
//! path the install engine writes to is built with [`target_path`], which
//! refuses anything that would land outside the install root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Normalize a package-relative path
///
/// Skips `.` components and leading slashes, rejects `..`. An empty result
/// is allowed and denotes the install root itself.
///
/// # Examples
///
/// ```
/// use setupkit::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("/bin/./app").unwrap(), PathBuf::from("bin/app"));
/// assert!(sanitize_path("bin/../../etc").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path.display().to_string()));
            }
            Component::Prefix(_) => {
                return Err(Error::InvalidPath(format!(
                    "drive prefix in package path: {}",
                    path.display()
                )));
            }
        }
    }

    Ok(normalized)
}

/// Join a package-relative path onto the install root
///
/// The parent of the result must not resolve (through existing symlinks)
/// outside the root. The final component is not followed, so a link
/// created by an earlier install can be replaced or removed.
pub fn target_path(root: &Path, rel: impl AsRef<Path>) -> Result<PathBuf> {
    let sanitized = sanitize_path(rel)?;
    let joined = root.join(&sanitized);

    if let Some(parent) = joined.parent()
        && sanitized.components().count() > 1
        && let (Ok(canonical_root), Ok(canonical_parent)) =
            (root.canonicalize(), parent.canonicalize())
        && !canonical_parent.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "{} escapes install root {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// File stem for per-package state files (reversal log, lock)
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn state_file_stem(package_name: &str) -> Result<String> {
    let stem: String = package_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        return Err(Error::InvalidPath(format!(
            "package name {:?} cannot name a state file",
            package_name
        )));
    }
    Ok(stem)
}
