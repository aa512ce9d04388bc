// src/commands/build.rs
//! Package build command

use super::format_size;
use anyhow::{Context, Result};
use setupkit::{Codec, Description};
use std::path::{Path, PathBuf};
use tracing::info;

/// Build and seal a package from a description file
pub fn cmd_build(description: &str, output: Option<&str>, codec: Option<Codec>) -> Result<()> {
    let description_path = Path::new(description);
    let desc = Description::load(description_path)
        .with_context(|| format!("Failed to load description {}", description))?;

    info!(
        "Building {} {} from {}",
        desc.package.name,
        desc.package.version,
        description_path.display()
    );

    let mut package = desc
        .build_package()
        .context("Failed to build the content tree")?;
    if let Some(codec) = codec {
        package.codec = codec;
    }

    let output = output.map(PathBuf::from).unwrap_or_else(|| {
        PathBuf::from(format!(
            "{}-{}.skpg",
            desc.package.name, desc.package.version
        ))
    });

    let summary = package
        .seal_to_file(&output)
        .with_context(|| format!("Failed to write package {}", output.display()))?;

    let stats = package.tree.stats();
    println!("Built {}", output.display());
    println!(
        "  {} directories, {} files, {} links, {} environment edits",
        stats.directories, stats.files, stats.links, stats.env_vars
    );
    println!(
        "  {} records, {} uncompressed, {} on disk ({})",
        summary.records,
        format_size(summary.uncompressed_size),
        format_size(summary.total_size),
        package.codec
    );
    Ok(())
}
