//! User-facing package specifications.
//!
//! A `PackageSpec` is what callers hand to the operation dispatcher: some
//! subset of name, uuid, version requirement and tracking information. The
//! validator normalises these before any operation touches an environment.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::package::VersionSpec;

/// How a package's source tree is obtained.
///
/// `Path` and `Repo` are mutually exclusive by construction; a spec that is
/// neither is resolved through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tracking {
    /// Resolved through the registry at a solver-chosen version.
    #[default]
    Registry,
    /// Followed directly from a filesystem checkout.
    Path(PathBuf),
    /// Followed from a git repository.
    Repo {
        source: String,
        rev: Option<String>,
        subdir: Option<String>,
    },
}

impl Tracking {
    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Registry)
    }

    pub fn repo_source(&self) -> Option<&str> {
        match self {
            Self::Repo { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Scope a spec (or an operation) applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Project,
    Manifest,
}

/// Solver strictness for already-installed packages (add/develop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreserveLevel {
    #[default]
    Tiered,
    All,
    Direct,
    Semver,
    None,
}

/// Maximum allowed version bump for `up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeLevel {
    Fixed,
    Patch,
    Minor,
    #[default]
    Major,
}

/// A user-supplied package specification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: Option<String>,
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub version: VersionSpec,
    /// Content hash of the wanted source tree, lowercase hex SHA-1.
    pub tree_hash: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub tracking: Tracking,
}

impl PackageSpec {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_uuid(uuid: Uuid) -> Self {
        Self {
            uuid: Some(uuid),
            ..Self::default()
        }
    }

    /// Short human form for error messages: name, uuid, or both.
    pub fn display_name(&self) -> String {
        match (&self.name, &self.uuid) {
            (Some(n), Some(u)) => format!("{n} [{}]", &u.to_string()[..8]),
            (Some(n), None) => n.clone(),
            (None, Some(u)) => u.to_string(),
            (None, None) => "(empty spec)".to_string(),
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
