// src/tree/mod.rs

//! Content tree with arena allocation
//!
//! The content tree is the in-memory model of everything a package
//! installs: directories, files, links and environment variable edits.
//!
//! # Design
//!
//! - **Arena Allocation**: All nodes live in a contiguous Vec and are
//!   referenced by `NodeId` indices. Parents are stored as indices, so the
//!   tree has no cyclic ownership and paths are rebuilt by walking up.
//!
//! - **Declaration Order**: Children keep insertion order. Pre-order
//!   traversal in that order is the canonical order for serialization and
//!   for install-time materialization.
//!
//! - **Lazy Components**: Component tags are stored only where declared.
//!   The effective set of a node is resolved on demand from its nearest
//!   tagged ancestor.
//!
//! Node paths are relative, `/`-separated, and the root's path is empty.

mod builder;

pub use builder::resolve_source;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::components::ComponentSet;
use crate::error::{Error, Result};

/// Index into the arena for referencing nodes
///
/// Invalid NodeIds cause panics when used; they can only come from a
/// different tree, which is a bug in the calling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Get the raw index value
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// How an environment variable edit combines with the existing value
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EnvMode {
    /// Replace the value
    #[default]
    Set,
    /// Add after the existing value, separated by the list separator
    Append,
    /// Add before the existing value, separated by the list separator
    Prepend,
}

/// Where a link points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTarget {
    /// Relative path of a File or Directory node in the same package
    Package(String),
    /// Absolute path on the running system
    Absolute(PathBuf),
}

/// Source of a file's bytes before the package is sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Read from disk when the package is sealed
    Path(PathBuf),
    /// Held in memory (tests, or a tree decoded from a package)
    Memory(Arc<[u8]>),
}

/// Type of content tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Directory node that can contain children
    Directory,
    /// Regular file
    File {
        /// Payload length in bytes
        size: u64,
        /// Where the payload comes from
        source: FileSource,
    },
    /// Link or shortcut
    Link {
        target: LinkTarget,
        display_name: String,
    },
    /// Environment variable edit applied after files are in place
    EnvironmentVariable {
        variable: String,
        value: String,
        mode: EnvMode,
    },
}

/// A node in the content tree
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    components: ComponentSet,
}

impl Node {
    /// Get the node name (unique among its siblings)
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the node kind
    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Get the parent node ID
    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Get children node IDs in declaration order
    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Component tags declared on this node (not inherited ones)
    #[inline]
    pub fn components(&self) -> &ComponentSet {
        &self.components
    }

    /// Check if this is a directory
    #[inline]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    /// Check if this is a regular file
    #[inline]
    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }
}

/// Arena-allocated content tree
///
/// # Example
///
/// ```ignore
/// use setupkit::tree::ContentTree;
///
/// let mut tree = ContentTree::new();
/// let bin = tree.add_directory(tree.root(), "bin")?;
/// tree.add_file_bytes(bin, "app", b"#!/bin/sh\n".to_vec())?;
///
/// for id in tree.traverse() {
///     println!("{}", tree.path(id));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ContentTree {
    nodes: Vec<Node>,
    path_index: HashMap<String, NodeId>,
    root: NodeId,
}

impl Default for ContentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentTree {
    /// Create a tree holding only the root directory
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            kind: NodeKind::Directory,
            parent: None,
            children: Vec::new(),
            components: ComponentSet::new(),
        };

        let root_id = NodeId(0);
        let mut path_index = HashMap::new();
        path_index.insert(String::new(), root_id);

        Self {
            nodes: vec![root],
            path_index,
            root: root_id,
        }
    }

    /// Get the root node ID
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get the total number of nodes, root included
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree holds only the root
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Get a node by ID
    ///
    /// # Panics
    ///
    /// Panics if the NodeId is out of bounds.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Look up a node by relative path
    #[inline]
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.path_index.get(normalize(path)).copied()
    }

    /// Get a node by relative path
    pub fn get(&self, path: &str) -> Result<&Node> {
        self.lookup(path)
            .map(|id| self.node(id))
            .ok_or_else(|| Error::NotFound(format!("node not found: {}", path)))
    }

    /// Rebuild the relative path of a node by walking parent indices
    pub fn path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);

        while let Some(cur) = current {
            let node = self.node(cur);
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            current = node.parent;
        }

        names.reverse();
        names.join("/")
    }

    /// Add a child node under a directory
    ///
    /// Fails with `PathCollision` if the parent already has a child with
    /// the same name.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
    ) -> Result<NodeId> {
        let name = name.into();
        validate_name(&name)?;

        if !self.node(parent).is_directory() {
            return Err(Error::InvalidPath(format!(
                "parent is not a directory: {}",
                self.path(parent)
            )));
        }

        let parent_path = self.path(parent);
        let path = join(&parent_path, &name);
        if self.path_index.contains_key(&path) {
            return Err(Error::PathCollision(format!("node already exists: {}", path)));
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            components: ComponentSet::new(),
        });
        self.node_mut(parent).children.push(id);
        self.path_index.insert(path, id);

        Ok(id)
    }

    /// Add a directory
    pub fn add_directory(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId> {
        self.add_node(parent, name, NodeKind::Directory)
    }

    /// Add a file with a known size and source
    pub fn add_file(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        size: u64,
        source: FileSource,
    ) -> Result<NodeId> {
        self.add_node(parent, name, NodeKind::File { size, source })
    }

    /// Add a file whose bytes are held in memory
    pub fn add_file_bytes(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
    ) -> Result<NodeId> {
        let content = content.into();
        let size = content.len() as u64;
        self.add_file(parent, name, size, FileSource::Memory(content))
    }

    /// Add a file read from disk at seal time; its size is taken now
    pub fn add_file_from_path(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<NodeId> {
        let path = path.into();
        let size = fs::metadata(&path)?.len();
        self.add_file(parent, name, size, FileSource::Path(path))
    }

    /// Add a link or shortcut
    pub fn add_link(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        target: LinkTarget,
        display_name: impl Into<String>,
    ) -> Result<NodeId> {
        self.add_node(
            parent,
            name,
            NodeKind::Link {
                target,
                display_name: display_name.into(),
            },
        )
    }

    /// Add an environment variable edit
    pub fn add_env_var(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        variable: impl Into<String>,
        value: impl Into<String>,
        mode: EnvMode,
    ) -> Result<NodeId> {
        self.add_node(
            parent,
            name,
            NodeKind::EnvironmentVariable {
                variable: variable.into(),
                value: value.into(),
                mode,
            },
        )
    }

    /// Create a directory path, reusing directories that already exist
    pub fn mkdir_p(&mut self, path: &str) -> Result<NodeId> {
        let mut current = self.root;

        for segment in normalize(path).split('/').filter(|s| !s.is_empty()) {
            let existing = self
                .node(current)
                .children
                .iter()
                .copied()
                .find(|&child| self.node(child).name == segment);

            current = match existing {
                Some(child) if self.node(child).is_directory() => child,
                Some(child) => {
                    return Err(Error::PathCollision(format!(
                        "not a directory: {}",
                        self.path(child)
                    )));
                }
                None => self.add_directory(current, segment)?,
            };
        }

        Ok(current)
    }

    /// Replace the component tags declared on a node
    pub fn set_components(&mut self, id: NodeId, components: ComponentSet) {
        self.node_mut(id).components = components;
    }

    /// Add component tags to a node
    pub fn tag(&mut self, id: NodeId, components: &ComponentSet) {
        self.node_mut(id)
            .components
            .extend(components.iter().cloned());
    }

    /// Effective component set of a node
    ///
    /// A node's own tags if it has any, otherwise those of its nearest
    /// ancestor with tags, otherwise empty (always installed).
    pub fn resolve_components(&self, id: NodeId) -> ComponentSet {
        let mut current = Some(id);
        while let Some(cur) = current {
            let node = self.node(cur);
            if !node.components.is_empty() {
                return node.components.clone();
            }
            current = node.parent;
        }
        ComponentSet::new()
    }

    /// Every component named anywhere in the tree
    pub fn components_in_use(&self) -> ComponentSet {
        self.nodes
            .iter()
            .flat_map(|n| n.components.iter().cloned())
            .collect()
    }

    /// Lazy pre-order traversal: directories before their children,
    /// children in declaration order
    ///
    /// Each call starts a fresh traversal.
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Pre-order walk that also reports when a directory's children end
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            tree: self,
            stack: vec![(self.root, false)],
        }
    }

    /// Check that every package link resolves to a File or Directory node
    pub fn validate_links(&self) -> Result<()> {
        for id in self.traverse() {
            if let NodeKind::Link {
                target: LinkTarget::Package(target),
                ..
            } = &self.node(id).kind
            {
                match self.lookup(target).map(|t| self.node(t)) {
                    Some(node) if node.is_file() || node.is_directory() => {}
                    Some(_) => {
                        return Err(Error::InvalidLinkTarget(format!(
                            "{} -> {} is neither a file nor a directory",
                            self.path(id),
                            target
                        )));
                    }
                    None => {
                        return Err(Error::InvalidLinkTarget(format!(
                            "{} -> {} does not exist in the package",
                            self.path(id),
                            target
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Count nodes by kind: (directories, files, links, environment edits)
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Directory => stats.directories += 1,
                NodeKind::File { size, .. } => {
                    stats.files += 1;
                    stats.total_bytes += size;
                }
                NodeKind::Link { .. } => stats.links += 1,
                NodeKind::EnvironmentVariable { .. } => stats.env_vars += 1,
            }
        }
        stats
    }
}

/// Summary counts for a content tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub directories: usize,
    pub files: usize,
    pub links: usize,
    pub env_vars: usize,
    pub total_bytes: u64,
}

/// Pre-order iterator over node IDs
pub struct Traverse<'a> {
    tree: &'a ContentTree,
    stack: Vec<NodeId>,
}

impl Iterator for Traverse<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.node(id).children.iter().rev().copied());
        Some(id)
    }
}

/// Event produced by [`ContentTree::walk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEvent {
    /// A node is visited (directories before their children)
    Enter(NodeId),
    /// All children of a directory have been visited
    Exit(NodeId),
}

/// Pre-order walk with directory exit events
pub struct Walk<'a> {
    tree: &'a ContentTree,
    stack: Vec<(NodeId, bool)>,
}

impl Iterator for Walk<'_> {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        let (id, exiting) = self.stack.pop()?;
        if exiting {
            return Some(WalkEvent::Exit(id));
        }

        let node = self.tree.node(id);
        if node.is_directory() {
            self.stack.push((id, true));
            self.stack
                .extend(node.children.iter().rev().map(|&child| (child, false)));
        }
        Some(WalkEvent::Enter(id))
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Check that a node name is a single, non-special path segment
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(Error::InvalidPath(format!("invalid node name: {:?}", name)));
    }
    Ok(())
}
