// src/description.rs

//! Package description (setupkit.toml) parsing
//!
//! A description names the package, declares its components and lists
//! where content comes from. `build` turns it into a sealed package.
//!
//! ```toml
//! [package]
//! name = "demo"
//! version = "1.0.0"
//! default_root = "/opt/demo"
//! codec = "bzip2"
//!
//! [[component]]
//! name = "core"
//!
//! [[component]]
//! name = "docs"
//! default = false
//!
//! [[source]]
//! path = "build/out"
//! exclude = ["**/*.pdb"]
//!
//! [[source]]
//! path = "manual"
//! dest = "docs"
//! components = ["docs"]
//!
//! [[link]]
//! path = "Demo"
//! target = "bin/demo"
//!
//! [[env]]
//! variable = "PATH"
//! value = "${INSTALL_ROOT}/bin"
//! mode = "prepend"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::components::{ComponentInfo, ComponentSet, FilterRule, RuleSet};
use crate::compression::Codec;
use crate::error::{Error, Result};
use crate::filesystem::sanitize_path;
use crate::package::{
    DEFAULT_RESOURCE_NAME, DEFAULT_UNICODE_RESOURCE, ExternalInstaller, Hook, Manifest, Package,
};
use crate::tree::{ContentTree, EnvMode, LinkTarget, resolve_source};

/// Conventional description file name
pub const DESCRIPTION_FILE: &str = "setupkit.toml";

/// Root structure of a package description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Description {
    pub package: PackageSection,

    #[serde(default, rename = "component")]
    pub components: Vec<ComponentInfo>,

    #[serde(default, rename = "source")]
    pub sources: Vec<SourceSpec>,

    #[serde(default, rename = "link")]
    pub links: Vec<LinkSpec>,

    #[serde(default, rename = "env")]
    pub env: Vec<EnvSpec>,

    #[serde(default, rename = "hook")]
    pub hooks: Vec<Hook>,

    #[serde(default, rename = "external")]
    pub external: Vec<ExternalInstaller>,

    /// Directory relative source paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Package metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    pub default_root: PathBuf,

    #[serde(default)]
    pub codec: Codec,

    #[serde(default)]
    pub resource_name: Option<String>,

    #[serde(default)]
    pub unicode_resource: Option<String>,
}

/// A real directory grafted into the tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Directory on disk, relative to the description file
    pub path: PathBuf,

    /// Package directory the source lands in; empty for the root
    #[serde(default)]
    pub dest: String,

    /// Rules file (`include <pattern>` / `exclude <pattern>` lines)
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Rules in evaluation order, after those from `rules_file`
    #[serde(default)]
    pub rules: Vec<FilterRule>,

    /// Shorthand include patterns, appended after `rules`
    #[serde(default)]
    pub include: Vec<String>,

    /// Shorthand exclude patterns, appended last
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub case_insensitive: bool,

    #[serde(default)]
    pub components: ComponentSet,
}

impl SourceSpec {
    /// Assemble the rule set for this source
    pub fn rule_set(&self, base_dir: &Path) -> Result<RuleSet> {
        let mut rules = RuleSet::new();

        if let Some(file) = &self.rules_file {
            let path = resolve_source(base_dir, file);
            let loaded = RuleSet::load_from_file(&path).map_err(|e| {
                Error::DescriptionError(format!(
                    "cannot read rules file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            rules.extend(&loaded);
        }

        for rule in &self.rules {
            rules.push(rule.clone());
        }
        for pattern in &self.include {
            rules.push(FilterRule::include(pattern.clone()));
        }
        for pattern in &self.exclude {
            rules.push(FilterRule::exclude(pattern.clone()));
        }

        Ok(if self.case_insensitive {
            rules.case_insensitive()
        } else {
            rules
        })
    }
}

/// A link node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSpec {
    /// Package path of the link itself
    pub path: String,

    /// Package path of the target, or an absolute path on the target system
    pub target: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub components: ComponentSet,
}

impl LinkSpec {
    fn link_target(&self) -> Result<LinkTarget> {
        let target = Path::new(&self.target);
        if target.is_absolute() {
            return Ok(LinkTarget::Absolute(target.to_path_buf()));
        }
        let rel = sanitize_path(target)?;
        Ok(LinkTarget::Package(rel.to_string_lossy().replace('\\', "/")))
    }
}

/// An environment variable edit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvSpec {
    pub variable: String,
    pub value: String,

    #[serde(default)]
    pub mode: EnvMode,

    /// Node name; defaults to the variable name
    #[serde(default)]
    pub name: Option<String>,

    /// Package directory holding the node; empty for the root
    #[serde(default)]
    pub dir: String,

    #[serde(default)]
    pub components: ComponentSet,
}

impl Description {
    /// Load a description file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::DescriptionError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::parse(&content, base_dir)
    }

    /// Parse a description; relative source paths resolve against `base_dir`
    pub fn parse(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut description: Description = toml::from_str(content)
            .map_err(|e| Error::DescriptionError(format!("invalid description: {}", e)))?;
        description.base_dir = base_dir.into();
        description.validate()?;
        Ok(description)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Check fields that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.package.name.trim().is_empty() {
            return Err(Error::DescriptionError(
                "missing required field: package.name".to_string(),
            ));
        }
        if self.package.version.trim().is_empty() {
            return Err(Error::DescriptionError(
                "missing required field: package.version".to_string(),
            ));
        }

        let declared: ComponentSet = self.components.iter().map(|c| c.name.clone()).collect();
        if declared.len() != self.components.len() {
            return Err(Error::DescriptionError(
                "component declared more than once".to_string(),
            ));
        }

        let tagged = self
            .sources
            .iter()
            .flat_map(|s| s.components.iter())
            .chain(self.links.iter().flat_map(|l| l.components.iter()))
            .chain(self.env.iter().flat_map(|e| e.components.iter()))
            .chain(self.hooks.iter().flat_map(|h| h.components.iter()))
            .chain(self.external.iter().flat_map(|x| x.components.iter()));
        for name in tagged {
            if !declared.contains(name) {
                return Err(Error::DescriptionError(format!(
                    "component {} is used but not declared",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Package manifest described by this document
    pub fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new(
            self.package.name.clone(),
            self.package.version.clone(),
            self.package.default_root.clone(),
        );
        manifest.description = self.package.description.clone();
        manifest.components = self.components.clone();
        manifest.hooks = self.hooks.clone();
        manifest.external = self.external.clone();
        manifest
    }

    /// Build the content tree: sources first, then links and env edits
    pub fn build_tree(&self) -> Result<ContentTree> {
        let mut tree = ContentTree::new();

        for source in &self.sources {
            let path = resolve_source(&self.base_dir, &source.path);
            let rules = source.rule_set(&self.base_dir)?;
            debug!(
                "Grafting {} at /{} ({} rules)",
                path.display(),
                source.dest,
                rules.len()
            );
            tree.add_source(&path, &source.dest, &rules, &source.components)?;
        }

        for link in &self.links {
            let rel = sanitize_path(&link.path)?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            let (parent, name) = match rel.rsplit_once('/') {
                Some((parent, name)) => (parent.to_string(), name.to_string()),
                None => (String::new(), rel.clone()),
            };
            if name.is_empty() {
                return Err(Error::DescriptionError(format!(
                    "link path {:?} has no name",
                    link.path
                )));
            }

            let parent_id = tree.mkdir_p(&parent)?;
            let display_name = link.display_name.clone().unwrap_or_else(|| name.clone());
            let id = tree.add_link(parent_id, name, link.link_target()?, display_name)?;
            tree.tag(id, &link.components);
        }

        for env in &self.env {
            let parent_id = tree.mkdir_p(&env.dir)?;
            let name = env.name.clone().unwrap_or_else(|| env.variable.clone());
            let id = tree.add_env_var(
                parent_id,
                name,
                env.variable.clone(),
                env.value.clone(),
                env.mode,
            )?;
            tree.tag(id, &env.components);
        }

        Ok(tree)
    }

    /// Build the tree and wrap it in an unsealed package
    pub fn build_package(&self) -> Result<Package> {
        let tree = self.build_tree()?;
        tree.validate_links()?;

        let stats = tree.stats();
        info!(
            "Described {} {}: {} directories, {} files ({} bytes), {} links, {} environment edits",
            self.package.name,
            self.package.version,
            stats.directories,
            stats.files,
            stats.total_bytes,
            stats.links,
            stats.env_vars
        );

        let mut package = Package::new(self.manifest(), tree).with_codec(self.package.codec);
        package.resource_name = self
            .package
            .resource_name
            .clone()
            .unwrap_or_else(|| DEFAULT_RESOURCE_NAME.to_string());
        package.unicode_resource = self
            .package
            .unicode_resource
            .clone()
            .unwrap_or_else(|| DEFAULT_UNICODE_RESOURCE.to_string());
        Ok(package)
    }
}
