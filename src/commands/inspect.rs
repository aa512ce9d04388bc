// src/commands/inspect.rs
//! Package inspection command

use super::format_size;
use anyhow::{Context, Result};
use setupkit::package::HookCheck;
use setupkit::{LinkTarget, NodeKind, Package, PackageReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Show a package's header and manifest, optionally its whole tree
pub fn cmd_inspect(package_path: &str, show_tree: bool, json: bool) -> Result<()> {
    let path = Path::new(package_path);

    if show_tree {
        let file = File::open(path).with_context(|| format!("Failed to open {}", package_path))?;
        let package = Package::read(BufReader::new(file))
            .with_context(|| format!("Failed to read package {}", package_path))?;
        if json {
            println!("{}", serde_json::to_string_pretty(&package.manifest)?);
        } else {
            print_tree(&package);
        }
        return Ok(());
    }

    let reader =
        PackageReader::open(path).with_context(|| format!("Failed to read package {}", package_path))?;
    let header = reader.header();
    let manifest = reader.manifest();

    if json {
        println!("{}", serde_json::to_string_pretty(manifest)?);
        return Ok(());
    }

    println!("{} {}", manifest.name, manifest.version);
    if let Some(description) = &manifest.description {
        println!("  {}", description);
    }
    println!("Default root: {}", manifest.default_root.display());
    println!(
        "Record stream: {} ({}, resource {})",
        format_size(header.uncompressed_size),
        header.codec,
        header.resource_name
    );

    if !manifest.components.is_empty() {
        println!("Components:");
        for component in &manifest.components {
            let marker = if component.default { "*" } else { " " };
            match &component.description {
                Some(description) => println!("  {} {} - {}", marker, component.name, description),
                None => println!("  {} {}", marker, component.name),
            }
        }
        println!("  (* selected by default)");
    }

    if !manifest.hooks.is_empty() {
        println!("Preinstall checks:");
        for hook in &manifest.hooks {
            let check = match &hook.check {
                HookCheck::CommandAvailable { command } => format!("command {}", command),
                HookCheck::PathExists { path } => format!("path {}", path.display()),
                HookCheck::EnvVarSet { variable } => format!("variable {}", variable),
            };
            println!("  {}: {}", hook.name, check);
        }
    }

    if !manifest.external.is_empty() {
        println!("External installers:");
        for external in &manifest.external {
            println!(
                "  {} (uninstall: {} {})",
                external.name,
                external.uninstall.program,
                external.uninstall.args.join(" ")
            );
        }
    }

    Ok(())
}

fn print_tree(package: &Package) {
    let tree = &package.tree;
    for id in tree.traverse() {
        if id == tree.root() {
            continue;
        }
        let node = tree.node(id);
        let path = tree.path(id);
        let detail = match node.kind() {
            NodeKind::Directory => format!("{}/", path),
            NodeKind::File { size, .. } => format!("{} ({})", path, format_size(*size)),
            NodeKind::Link { target, .. } => match target {
                LinkTarget::Package(rel) => format!("{} -> {}", path, rel),
                LinkTarget::Absolute(abs) => format!("{} -> {}", path, abs.display()),
            },
            NodeKind::EnvironmentVariable {
                variable,
                value,
                mode,
            } => format!("{} [{} {} {}]", path, mode, variable, value),
        };

        let components = tree.resolve_components(id);
        if components.is_empty() {
            println!("{}", detail);
        } else {
            let names: Vec<&str> = components.iter().map(String::as_str).collect();
            println!("{}  <{}>", detail, names.join(","));
        }
    }
}
