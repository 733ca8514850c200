//! The manifest: the environment's resolved dependency graph.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::package::PackageId;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest is not closed: {0} references missing dependency {1}")]
    NotClosed(String, Uuid),

    #[error("name {0} is ambiguous in the manifest")]
    AmbiguousName(String),
}

/// Where a repo-tracked entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

/// One resolved package in the manifest, keyed externally by uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(
        rename = "git-tree-sha1",
        skip_serializing_if = "Option::is_none"
    )]
    pub tree_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
    // Sub-tables last so the serialized entry keeps values ahead of tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoSource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deps: BTreeMap<String, Uuid>,
}

impl ManifestEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            tree_hash: None,
            repo: None,
            path: None,
            pinned: false,
            deps: BTreeMap::new(),
        }
    }

    /// Registry-tracked entries (no path, no repo) are the only ones the
    /// solver may move.
    pub fn is_registry_tracked(&self) -> bool {
        self.repo.is_none() && self.path.is_none()
    }
}

/// A parsed Manifest.toml.
///
/// Invariant: every uuid referenced from any entry's `deps` is itself a key,
/// transitively. `assert_closed` checks this after mutations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<Uuid, ManifestEntry>,
}

impl Manifest {
    pub fn get(&self, uuid: Uuid) -> Option<&ManifestEntry> {
        self.packages.get(&uuid)
    }

    /// Find the unique uuid carrying `name`.
    ///
    /// Distinct packages may share a name across registries, so lookup by
    /// name alone can be ambiguous.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Uuid>, ManifestError> {
        let mut hits = self
            .packages
            .iter()
            .filter(|(_, e)| e.name == name)
            .map(|(u, _)| *u);
        match (hits.next(), hits.next()) {
            (Some(_), Some(_)) => Err(ManifestError::AmbiguousName(name.to_string())),
            (first, _) => Ok(first),
        }
    }

    pub fn package_id(&self, uuid: Uuid) -> Option<PackageId> {
        self.get(uuid).map(|e| PackageId::new(e.name.clone(), uuid))
    }

    /// All uuids reachable from `roots` through `deps`.
    pub fn reachable_from(&self, roots: impl IntoIterator<Item = Uuid>) -> BTreeSet<Uuid> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<Uuid> = roots.into_iter().collect();
        while let Some(uuid) = stack.pop() {
            if !seen.insert(uuid) {
                continue;
            }
            if let Some(entry) = self.get(uuid) {
                stack.extend(entry.deps.values().copied());
            }
        }
        seen
    }

    /// Check the transitive-closure invariant.
    pub fn assert_closed(&self) -> Result<(), ManifestError> {
        for entry in self.packages.values() {
            for dep in entry.deps.values() {
                if !self.packages.contains_key(dep) {
                    return Err(ManifestError::NotClosed(entry.name.clone(), *dep));
                }
            }
        }
        Ok(())
    }

    /// Drop every entry not reachable from `roots`.
    pub fn prune(&mut self, roots: impl IntoIterator<Item = Uuid>) {
        let keep = self.reachable_from(roots);
        self.packages.retain(|uuid, _| keep.contains(uuid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, deps: &[(&str, Uuid)]) -> ManifestEntry {
        let mut e = ManifestEntry::new(name);
        e.deps = deps.iter().map(|(n, u)| (n.to_string(), *u)).collect();
        e
    }

    #[test]
    fn closure_check() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut manifest = Manifest::default();
        manifest.packages.insert(a, entry("A", &[("B", b)]));
        assert!(manifest.assert_closed().is_err());

        manifest.packages.insert(b, entry("B", &[]));
        assert!(manifest.assert_closed().is_ok());
    }

    #[test]
    fn prune_keeps_reachable() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let mut manifest = Manifest::default();
        manifest.packages.insert(a, entry("A", &[("B", b)]));
        manifest.packages.insert(b, entry("B", &[]));
        manifest.packages.insert(c, entry("C", &[]));

        manifest.prune([a]);
        assert!(manifest.packages.contains_key(&a));
        assert!(manifest.packages.contains_key(&b));
        assert!(!manifest.packages.contains_key(&c));
    }

    #[test]
    fn ambiguous_name_is_an_error() {
        let mut manifest = Manifest::default();
        manifest.packages.insert(Uuid::new_v4(), entry("Dup", &[]));
        manifest.packages.insert(Uuid::new_v4(), entry("Dup", &[]));
        assert!(manifest.find_by_name("Dup").is_err());
        assert!(manifest.find_by_name("Missing").unwrap().is_none());
    }
}
