// src/tree/builder.rs

//! Building content trees from real directories
//!
//! Authoring walks one or more source directories, runs every candidate
//! relative path through the rule filter and grafts the survivors into the
//! tree. Excluded directories prune their whole subtree. Entries are visited
//! in file-name order so the same sources always produce the same tree.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::{ContentTree, FileSource, LinkTarget, NodeId, NodeKind};
use crate::components::{ComponentSet, RuleSet};
use crate::error::{Error, Result};

impl ContentTree {
    /// Build a tree from every entry under `root_path` that the rules include
    pub fn build(root_path: &Path, rules: &RuleSet) -> Result<Self> {
        let mut tree = Self::new();
        tree.add_source(root_path, "", rules, &ComponentSet::new())?;
        Ok(tree)
    }

    /// Graft a real directory under `dest`
    ///
    /// Directories that already exist in the tree are merged. Any other
    /// node mapping onto an existing path fails with `PathCollision`.
    ///
    /// `components` tags the `dest` directory, or each top-level entry of
    /// the source when grafting at the root.
    pub fn add_source(
        &mut self,
        source_root: &Path,
        dest: &str,
        rules: &RuleSet,
        components: &ComponentSet,
    ) -> Result<NodeId> {
        if !source_root.is_dir() {
            return Err(Error::InvalidPath(format!(
                "source is not a directory: {}",
                source_root.display()
            )));
        }

        let dest_id = self.mkdir_p(dest)?;
        let tag_top_level = dest_id == self.root;
        if !tag_top_level {
            self.tag(dest_id, components);
        }

        let walker = WalkDir::new(source_root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match relative_path(source_root, entry.path()) {
                Ok(rel) => rules.includes(&rel),
                // Keep it so the error surfaces below
                Err(_) => true,
            });

        let mut added = 0usize;
        for entry in walker {
            let entry = entry.map_err(|e| {
                Error::IoError(format!("failed to walk {}: {}", source_root.display(), e))
            })?;
            let rel = relative_path(source_root, entry.path())?;
            let (parent_rel, name) = match rel.rsplit_once('/') {
                Some((parent, name)) => (Some(parent), name),
                None => (None, rel.as_str()),
            };

            let parent_id = match parent_rel {
                Some(parent) => self.lookup(&join_dest(dest, parent)).ok_or_else(|| {
                    Error::NotFound(format!("parent of {} was not added", rel))
                })?,
                None => dest_id,
            };

            let file_type = entry.file_type();
            let id = if file_type.is_dir() {
                self.merge_directory(parent_id, name)?
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry.path())?;
                let target = link_target(parent_rel.unwrap_or(""), dest, &target)?;
                self.add_link(parent_id, name, target, name)?
            } else {
                let size = entry
                    .metadata()
                    .map_err(|e| Error::IoError(format!("{}: {}", entry.path().display(), e)))?
                    .len();
                self.add_file(
                    parent_id,
                    name,
                    size,
                    FileSource::Path(entry.path().to_path_buf()),
                )?
            };

            if tag_top_level && parent_rel.is_none() {
                self.tag(id, components);
            }
            debug!("Added {}", self.path(id));
            added += 1;
        }

        info!(
            "Added {} entries from {} at /{}",
            added,
            source_root.display(),
            dest.trim_matches('/')
        );
        Ok(dest_id)
    }

    fn merge_directory(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let existing = self
            .node(parent)
            .children()
            .iter()
            .copied()
            .find(|&child| self.node(child).name() == name);

        match existing {
            Some(id) if matches!(self.node(id).kind(), NodeKind::Directory) => Ok(id),
            Some(id) => Err(Error::PathCollision(format!(
                "two sources map to {}",
                self.path(id)
            ))),
            None => self.add_directory(parent, name),
        }
    }
}

/// Relative, `/`-separated path of an entry under the source root
fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        Error::InvalidPath(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(c) => segments.push(c.to_str().ok_or_else(|| {
                Error::InvalidPath(format!("non UTF-8 file name: {}", path.display()))
            })?),
            _ => {
                return Err(Error::InvalidPath(format!(
                    "unexpected path component in {}",
                    path.display()
                )));
            }
        }
    }
    Ok(segments.join("/"))
}

fn join_dest(dest: &str, rel: &str) -> String {
    let dest = dest.trim_matches('/');
    if dest.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", dest, rel)
    }
}

/// Map a real symlink onto a link node target
///
/// Absolute targets are kept as-is. Relative targets are resolved against
/// the link's directory and must stay inside the package.
fn link_target(parent_rel: &str, dest: &str, target: &Path) -> Result<LinkTarget> {
    if target.is_absolute() {
        return Ok(LinkTarget::Absolute(target.to_path_buf()));
    }

    let base = join_dest(dest, parent_rel);
    let mut resolved: Vec<String> = base
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    for component in target.components() {
        match component {
            Component::Normal(c) => resolved.push(c.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved.pop().is_none() {
                    return Err(Error::InvalidLinkTarget(format!(
                        "{} escapes the package",
                        target.display()
                    )));
                }
            }
            _ => {
                return Err(Error::InvalidLinkTarget(format!(
                    "unsupported link target {}",
                    target.display()
                )));
            }
        }
    }

    Ok(LinkTarget::Package(resolved.join("/")))
}

/// Resolve a source path from a description file relative to its directory
pub fn resolve_source(base_dir: &Path, source: &Path) -> PathBuf {
    if source.is_absolute() {
        source.to_path_buf()
    } else {
        base_dir.join(source)
    }
}
