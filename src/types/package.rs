//! Package identity and version requirements.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fully determined package identity.
///
/// User-supplied specs may carry only one half; everything internal (manifest
/// entries, the precompile graph, suspension records) requires both.
///
/// # Example
///
/// ```
/// use depot::types::PackageId;
/// use uuid::Uuid;
///
/// let id = PackageId::new("Example", Uuid::nil());
/// assert_eq!(id.to_string(), "Example [00000000]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub uuid: Uuid,
}

impl PackageId {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuid = self.uuid.to_string();
        write!(f, "{} [{}]", self.name, &uuid[..8])
    }
}

/// A version requirement attached to a spec.
///
/// Ranges keep explicit bounds so the validator can distinguish a pinnable
/// exact requirement (`lower == upper`) from a genuine range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionSpec {
    /// No requirement; the solver is free to choose.
    Any,
    /// Exactly this version.
    Exact(Version),
    /// An inclusive range.
    Range { lower: Version, upper: Version },
}

impl VersionSpec {
    /// Parse `"1.2.3"` or `"1.2.3 - 1.4.0"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Some(Self::Any);
        }
        // Exact first: "1.0.0-alpha" is a prerelease, not a range.
        if let Ok(version) = Version::parse(s) {
            return Some(Self::Exact(version));
        }
        if let Some((lo, hi)) = s.split_once('-') {
            let lower = Version::parse(lo.trim()).ok()?;
            let upper = Version::parse(hi.trim()).ok()?;
            return Some(Self::Range { lower, upper });
        }
        None
    }

    /// The single version this spec names, if it names exactly one.
    pub fn as_exact(&self) -> Option<&Version> {
        match self {
            Self::Exact(v) => Some(v),
            Self::Range { lower, upper } if lower == upper => Some(lower),
            _ => None,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl Default for VersionSpec {
    fn default() -> Self {
        Self::Any
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Range { lower, upper } => write!(f, "{lower} - {upper}"),
        }
    }
}
