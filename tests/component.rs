// tests/component.rs

//! Component selection during install.

mod common;

use common::{Sandbox, manifest, path_nodes, sample_blob, sample_tree, seal, tags};
use setupkit::{Codec, ContentTree, InstallState, LinkTarget, Package, RunOptions, Selection};
use std::fs;

const COMPONENTS: [&str; 3] = ["core", "docs", "extras"];

/// Every subset of the declared components
fn all_selections() -> Vec<Vec<&'static str>> {
    (0..1u32 << COMPONENTS.len())
        .map(|mask| {
            COMPONENTS
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, name)| *name)
                .collect()
        })
        .collect()
}

/// A node is installed iff its effective tags are empty or meet the selection
#[test]
fn test_installed_nodes_match_selection() {
    let tree = sample_tree();
    let blob = sample_blob(Codec::Deflate);

    for names in all_selections() {
        let sandbox = Sandbox::new();
        let selection = Selection::from_names(names.iter().copied());
        let report = sandbox.install(&blob, Some(selection.clone()), RunOptions::new());
        assert_eq!(report.state, InstallState::Completed, "selection {:?}", names);

        for id in path_nodes(&tree) {
            let effective = tree.resolve_components(id);
            let expected = effective.is_empty() || effective.iter().any(|c| names.contains(&c.as_str()));
            let path = sandbox.root.join(tree.path(id));
            let exists = fs::symlink_metadata(&path).is_ok();
            assert_eq!(
                exists,
                expected,
                "{} with selection {:?} (effective {:?})",
                tree.path(id),
                names,
                effective
            );
        }
    }
}

#[test]
fn test_default_selection_uses_manifest_defaults() {
    let sandbox = Sandbox::new();
    let report = sandbox.install(&sample_blob(Codec::Store), None, RunOptions::new());
    assert!(report.is_success());

    // core is default, docs and extras are opt-in
    assert!(sandbox.root.join("bin/demo").exists());
    assert!(sandbox.root.join("share/common.dat").exists());
    assert!(!sandbox.root.join("docs").exists());
    assert!(!sandbox.root.join("extras").exists());
    assert!(!sandbox.root.join("share/both.txt").exists());

    assert!(report.skipped.contains(&"docs".to_string()));
    assert!(report.skipped.contains(&"share/both.txt".to_string()));
    // Children of a skipped directory are not reported separately
    assert!(!report.skipped.contains(&"docs/manual.txt".to_string()));
}

#[test]
fn test_unknown_component_is_a_warning() {
    let sandbox = Sandbox::new();
    let selection = Selection::from_names(["core", "games"]);
    let report = sandbox.install(&sample_blob(Codec::Store), Some(selection), RunOptions::new());

    assert!(report.is_success());
    assert!(report.warnings.iter().any(|w| w.contains("games")));
}

#[test]
fn test_deselected_link_is_not_created() {
    let sandbox = Sandbox::new();
    let report = sandbox.install(
        &sample_blob(Codec::Store),
        Some(Selection::from_names(["docs"])),
        RunOptions::new(),
    );
    assert!(report.is_success());
    assert!(!sandbox.root.join("bin").exists());
    assert!(fs::symlink_metadata(sandbox.root.join("Demo")).is_err());
    assert!(sandbox.root.join("docs/api/index.html").exists());
}

#[test]
fn test_selected_node_under_deselected_directory() {
    // docs/ <docs>
    // ├── manual.txt
    // └── core.txt <core>
    let mut tree = ContentTree::new();
    let root = tree.root();
    let docs = tree.add_directory(root, "docs").unwrap();
    tree.set_components(docs, tags(&["docs"]));
    tree.add_file_bytes(docs, "manual.txt", b"manual".to_vec())
        .unwrap();
    let core = tree
        .add_file_bytes(docs, "core.txt", b"core".to_vec())
        .unwrap();
    tree.set_components(core, tags(&["core"]));
    let blob = seal(&Package::new(manifest("nested"), tree));

    let sandbox = Sandbox::new();
    let report = sandbox.install(
        &blob,
        Some(Selection::from_names(["core"])),
        RunOptions::new(),
    );
    assert_eq!(report.state, InstallState::Completed);
    assert_eq!(fs::read(sandbox.root.join("docs/core.txt")).unwrap(), b"core");
    assert!(!sandbox.root.join("docs/manual.txt").exists());
    assert_eq!(report.skipped, vec!["docs".to_string()]);

    // The ancestor created for core.txt is logged and removed again
    let uninstall = sandbox.uninstall("nested");
    assert_eq!(uninstall.unresolved, 0);
    assert!(!sandbox.root.exists());
}

#[test]
fn test_link_to_uninstalled_target_is_skipped() {
    // bin/ <core>
    // └── demo
    // Demo -> bin/demo (untagged)
    let mut tree = ContentTree::new();
    let root = tree.root();
    let bin = tree.add_directory(root, "bin").unwrap();
    tree.set_components(bin, tags(&["core"]));
    tree.add_file_bytes(bin, "demo", b"demo".to_vec()).unwrap();
    tree.add_file_bytes(root, "README", b"read me".to_vec())
        .unwrap();
    tree.add_link(root, "Demo", LinkTarget::Package("bin/demo".into()), "Demo")
        .unwrap();
    let blob = seal(&Package::new(manifest("links"), tree));

    let sandbox = Sandbox::new();
    let report = sandbox.install(
        &blob,
        Some(Selection::from_names(["docs"])),
        RunOptions::new(),
    );
    assert_eq!(report.state, InstallState::Completed);
    assert!(sandbox.root.join("README").exists());
    assert!(!sandbox.root.join("bin").exists());
    assert!(fs::symlink_metadata(sandbox.root.join("Demo")).is_err());
    assert!(report.skipped.contains(&"Demo".to_string()));
    assert!(report.warnings.iter().any(|w| w.contains("Demo")));

    // With the target selected the link is created
    let sandbox = Sandbox::new();
    let report = sandbox.install(
        &blob,
        Some(Selection::from_names(["core"])),
        RunOptions::new(),
    );
    assert!(report.is_success());
    assert!(fs::symlink_metadata(sandbox.root.join("Demo")).is_ok());
}
