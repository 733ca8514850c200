//! The project file: direct dependencies plus optional self-identity.

use std::collections::BTreeMap;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A parsed Project.toml.
///
/// The self-identity fields make the project itself a package (so it can be
/// developed, precompiled and depended on).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deps: BTreeMap<String, Uuid>,
}

impl Project {
    /// Look up a direct dependency uuid by name, including the project's own
    /// identity.
    pub fn find_uuid(&self, name: &str) -> Option<Uuid> {
        if self.name.as_deref() == Some(name) {
            return self.uuid;
        }
        self.deps.get(name).copied()
    }

    /// Name of a direct dependency by uuid.
    pub fn find_name(&self, uuid: Uuid) -> Option<&str> {
        if self.uuid == Some(uuid) {
            return self.name.as_deref();
        }
        self.deps
            .iter()
            .find(|(_, u)| **u == uuid)
            .map(|(n, _)| n.as_str())
    }

    /// Whether the project carries enough identity to be a package itself.
    pub fn is_package(&self) -> bool {
        self.name.is_some() && self.uuid.is_some()
    }

    /// The source file a project-as-package compiles from, if present.
    pub fn source_file(&self, project_file: &Path) -> Option<std::path::PathBuf> {
        let name = self.name.as_deref()?;
        let dir = project_file.parent()?;
        let src = dir.join("src").join(format!("{name}.jl"));
        src.is_file().then_some(src)
    }
}
