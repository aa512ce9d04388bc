// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use setupkit::components::{ComponentInfo, ComponentSet};
use setupkit::{
    Codec, ContentTree, EnvMode, HostSystem, InstallConfig, InstallEngine, InstallReport,
    LinkTarget, Manifest, NodeId, Package, PackageReader, RunOptions, Selection,
    UninstallConfig, UninstallEngine, UninstallReport,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Scratch install root, state directory and environment file
///
/// Keep the value alive; the temporary directory is removed on drop.
pub struct Sandbox {
    _temp: TempDir,
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub env_file: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let base = std::path::absolute(temp.path()).unwrap();
        Self {
            root: base.join("root"),
            state_dir: base.join("state"),
            env_file: base.join("state/environment"),
            _temp: temp,
        }
    }

    pub fn log_path(&self, package: &str) -> PathBuf {
        setupkit::transaction::log_path_for(&self.state_dir, package).unwrap()
    }

    pub fn host(&self) -> HostSystem {
        HostSystem::open(&self.env_file).unwrap()
    }

    /// Install a sealed package blob
    pub fn install(
        &self,
        blob: &[u8],
        selection: Option<Selection>,
        options: RunOptions,
    ) -> InstallReport {
        let mut package = PackageReader::new(blob).unwrap();
        let mut config = InstallConfig::new(&self.root, self.log_path(&package.manifest().name));
        if let Some(selection) = selection {
            config = config.with_selection(selection);
        }
        let mut host = self.host();
        InstallEngine::new(config, &mut host)
            .with_options(options)
            .install(&mut package)
            .unwrap()
    }

    pub fn uninstall(&self, package: &str) -> UninstallReport {
        let mut host = self.host();
        UninstallEngine::new(UninstallConfig::new(self.log_path(package)), &mut host)
            .run()
            .unwrap()
    }

    /// Every path under the install root with file contents (None for
    /// directories, the target for links)
    pub fn snapshot(&self) -> BTreeMap<String, Option<Vec<u8>>> {
        snapshot(&self.root)
    }

    pub fn env(&self) -> BTreeMap<String, String> {
        self.host().variables().clone()
    }
}

pub fn snapshot(dir: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    let mut entries = BTreeMap::new();
    if !dir.exists() {
        return entries;
    }
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        let content = if entry.file_type().is_symlink() {
            Some(
                fs::read_link(entry.path())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
                    .into_bytes(),
            )
        } else if entry.file_type().is_file() {
            Some(fs::read(entry.path()).unwrap())
        } else {
            None
        };
        entries.insert(rel, content);
    }
    entries
}

pub fn tags(names: &[&str]) -> ComponentSet {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn manifest(name: &str) -> Manifest {
    let mut manifest = Manifest::new(name, "1.0.0", "/opt/demo");
    manifest.components = vec![
        ComponentInfo::new("core").with_description("Application"),
        ComponentInfo::new("docs").optional(),
        ComponentInfo::new("extras").optional(),
    ];
    manifest
}

/// A tree exercising every node kind and several component layouts
///
/// ```text
/// /
/// ├── bin/ <core>
/// │   ├── demo
/// │   └── helper
/// ├── docs/ <docs>
/// │   ├── manual.txt
/// │   └── api/
/// │       └── index.html
/// ├── extras/ <extras>
/// │   └── plugin.so
/// ├── share/
/// │   ├── common.dat
/// │   ├── guide.txt <docs>
/// │   └── both.txt <docs,extras>
/// ├── README
/// ├── Demo -> bin/demo <core>
/// └── DEMO_HOME (env)
/// ```
pub fn sample_tree() -> ContentTree {
    let mut tree = ContentTree::new();
    let root = tree.root();

    let bin = tree.add_directory(root, "bin").unwrap();
    tree.set_components(bin, tags(&["core"]));
    tree.add_file_bytes(bin, "demo", b"#!/bin/sh\necho demo\n".to_vec())
        .unwrap();
    tree.add_file_bytes(bin, "helper", vec![7u8; 4096]).unwrap();

    let docs = tree.add_directory(root, "docs").unwrap();
    tree.set_components(docs, tags(&["docs"]));
    tree.add_file_bytes(docs, "manual.txt", b"manual".to_vec())
        .unwrap();
    let api = tree.add_directory(docs, "api").unwrap();
    tree.add_file_bytes(api, "index.html", b"<html></html>".to_vec())
        .unwrap();

    let extras = tree.add_directory(root, "extras").unwrap();
    tree.set_components(extras, tags(&["extras"]));
    tree.add_file_bytes(extras, "plugin.so", vec![0u8; 100])
        .unwrap();

    let share = tree.add_directory(root, "share").unwrap();
    tree.add_file_bytes(share, "common.dat", b"common".to_vec())
        .unwrap();
    let guide = tree
        .add_file_bytes(share, "guide.txt", b"guide".to_vec())
        .unwrap();
    tree.set_components(guide, tags(&["docs"]));
    let both = tree
        .add_file_bytes(share, "both.txt", b"both".to_vec())
        .unwrap();
    tree.set_components(both, tags(&["docs", "extras"]));

    tree.add_file_bytes(root, "README", b"read me".to_vec())
        .unwrap();
    let link = tree
        .add_link(root, "Demo", LinkTarget::Package("bin/demo".into()), "Demo")
        .unwrap();
    tree.set_components(link, tags(&["core"]));
    tree.add_env_var(
        root,
        "DEMO_HOME",
        "DEMO_HOME",
        "${INSTALL_ROOT}",
        EnvMode::Set,
    )
    .unwrap();

    tree
}

pub fn seal(package: &Package) -> Vec<u8> {
    let mut blob = Vec::new();
    package.seal(&mut blob).unwrap();
    blob
}

pub fn sample_blob(codec: Codec) -> Vec<u8> {
    seal(&Package::new(manifest("demo"), sample_tree()).with_codec(codec))
}

/// Number of records the tree serializes to
pub fn record_count(tree: &ContentTree) -> usize {
    tree.walk().count()
}

/// Nodes that occupy a filesystem path (everything but env edits)
pub fn path_nodes(tree: &ContentTree) -> Vec<NodeId> {
    tree.traverse()
        .filter(|&id| id != tree.root())
        .filter(|&id| {
            !matches!(
                tree.node(id).kind(),
                setupkit::NodeKind::EnvironmentVariable { .. }
            )
        })
        .collect()
}
