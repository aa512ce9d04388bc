// src/components/mod.rs

//! Component model for setupkit packages
//!
//! Components are named, independently selectable units of functionality.
//! Nodes of the content tree carry zero or more component tags; a node
//! without tags inherits the tags of its nearest tagged ancestor, and a node
//! whose effective set is empty is always installed.
//!
//! # Usage
//!
//! ```ignore
//! use setupkit::components::{ComponentSet, Selection};
//!
//! let selection = Selection::from_names(["docs"]);
//! let tags: ComponentSet = ["docs".to_string()].into();
//! assert!(selection.includes(&tags));
//! assert!(selection.includes(&ComponentSet::new()));
//! ```
//!
//! # Authoring Rules
//!
//! Which real files become nodes is decided by the rule filter in
//! [`filters`], evaluated while the tree is built.

mod filters;

pub use filters::{glob_match, FilterRule, RuleAction, RuleSet};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered set of component names
pub type ComponentSet = BTreeSet<String>;

/// A component declared by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component name as used in node tags
    pub name: String,
    /// Human-readable description shown by installers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the component is selected when the caller does not choose
    #[serde(default = "default_selected")]
    pub default: bool,
}

fn default_selected() -> bool {
    true
}

impl ComponentInfo {
    /// Create a component that is selected by default
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            default: true,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the component as opt-in
    pub fn optional(mut self) -> Self {
        self.default = false;
        self
    }
}

/// The set of components chosen for an install run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    components: ComponentSet,
}

impl Selection {
    /// Select exactly the named components
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Select every component marked as default
    pub fn defaults(declared: &[ComponentInfo]) -> Self {
        Self::from_names(
            declared
                .iter()
                .filter(|c| c.default)
                .map(|c| c.name.clone()),
        )
    }

    /// Select every declared component
    pub fn all(declared: &[ComponentInfo]) -> Self {
        Self::from_names(declared.iter().map(|c| c.name.clone()))
    }

    /// Get the selected component names
    pub fn components(&self) -> &ComponentSet {
        &self.components
    }

    /// Decide whether something with the given effective tags is installed
    ///
    /// Untagged content is unconditional; tagged content needs at least one
    /// of its tags selected.
    pub fn includes(&self, effective: &ComponentSet) -> bool {
        effective.is_empty() || !effective.is_disjoint(&self.components)
    }

    /// Names in the selection that the package does not declare
    pub fn unknown<'a>(&'a self, declared: &'a [ComponentInfo]) -> Vec<&'a str> {
        self.components
            .iter()
            .filter(|name| !declared.iter().any(|c| &c.name == *name))
            .map(String::as_str)
            .collect()
    }
}

/// Parse a comma separated component list like "core,docs"
pub fn parse_component_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
