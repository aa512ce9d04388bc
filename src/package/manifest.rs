// src/package/manifest.rs

//! Package manifest
//!
//! Metadata stored CBOR-encoded in the package header: application identity,
//! default install root, component declarations, preinstall hooks and
//! external installers. The manifest is immutable once a package is sealed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::components::{ComponentInfo, ComponentSet};
use crate::error::{Error, Result};

/// Largest manifest a reader accepts
pub const MAX_MANIFEST_SIZE: u32 = 16 * 1024 * 1024;

/// Application metadata carried by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Install root used when the installer is not given one
    pub default_root: PathBuf,
    #[serde(default)]
    pub components: Vec<ComponentInfo>,
    #[serde(default)]
    pub hooks: Vec<Hook>,
    #[serde(default)]
    pub external: Vec<ExternalInstaller>,
}

impl Manifest {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        default_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            default_root: default_root.into(),
            components: Vec::new(),
            hooks: Vec::new(),
            external: Vec::new(),
        }
    }

    /// Names of every declared component
    pub fn component_names(&self) -> ComponentSet {
        self.components.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up a component declaration
    pub fn component(&self, name: &str) -> Option<&ComponentInfo> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Check internal consistency before sealing
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidPackage("package name is empty".into()));
        }

        let mut seen = ComponentSet::new();
        for component in &self.components {
            if !seen.insert(component.name.clone()) {
                return Err(Error::InvalidPackage(format!(
                    "component declared twice: {}",
                    component.name
                )));
            }
        }

        for external in &self.external {
            if external.uninstall.program.trim().is_empty() {
                return Err(Error::InvalidPackage(format!(
                    "external installer {} has no uninstall program",
                    external.name
                )));
            }
        }
        Ok(())
    }

    /// Encode as CBOR
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| Error::InvalidPackage(format!("failed to encode manifest: {}", e)))?;
        Ok(buf)
    }

    /// Decode from CBOR
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        ciborium::from_reader(data)
            .map_err(|e| Error::InvalidPackage(format!("failed to decode manifest: {}", e)))
    }
}

/// A check run before anything is written to the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub name: String,
    /// Components the hook applies to; empty means always
    #[serde(default)]
    pub components: ComponentSet,
    #[serde(flatten)]
    pub check: HookCheck,
    /// Shown to the user when the check fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What a preinstall hook verifies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum HookCheck {
    /// A program can be found on PATH
    CommandAvailable { command: String },
    /// A path exists on the target system
    PathExists { path: PathBuf },
    /// An environment variable is set
    EnvVarSet { variable: String },
}

/// Program invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// A bundled third-party installer run after files are in place
///
/// Its uninstaller is recorded in the reversal log and launched on
/// uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInstaller {
    pub name: String,
    #[serde(default)]
    pub components: ComponentSet,
    /// Run at install time; `None` registers only the uninstaller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<ExternalCommand>,
    pub uninstall: ExternalCommand,
    /// Seconds to wait for either command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}
