//! Depot on-disk layout.
//!
//! Every depot root carries four content-addressed trees plus a log tree:
//!
//! ```text
//! <depot>/packages/<name>/<slug>/        extracted package source
//! <depot>/artifacts/<sha1>/              extracted artifact content
//! <depot>/clones/<key>/                  bare git mirrors
//! <depot>/scratchspaces/<uuid>/<name>/   mutable per-package scratch
//! <depot>/logs/                          usage and orphanage records
//! ```

use std::path::{Path, PathBuf};

pub const MANIFEST_USAGE: &str = "manifest_usage.toml";
pub const ARTIFACT_USAGE: &str = "artifact_usage.toml";
pub const SCRATCH_USAGE: &str = "scratch_usage.toml";
pub const ORPHANED: &str = "orphaned.toml";

pub fn packages_dir(depot: &Path) -> PathBuf {
    depot.join("packages")
}

pub fn artifacts_dir(depot: &Path) -> PathBuf {
    depot.join("artifacts")
}

pub fn clones_dir(depot: &Path) -> PathBuf {
    depot.join("clones")
}

pub fn scratchspaces_dir(depot: &Path) -> PathBuf {
    depot.join("scratchspaces")
}

pub fn logs_dir(depot: &Path) -> PathBuf {
    depot.join("logs")
}

/// Deterministic directory slug for a package version: a short blake3 digest
/// of name and tree-hash. Two versions of one package land side by side under
/// `packages/<name>/`.
pub fn version_slug(name: &str, tree_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(b"/");
    hasher.update(tree_hash.as_bytes());
    hasher.finalize().to_hex()[..8].to_string()
}

/// Install path of a package version under one depot.
pub fn package_dir(depot: &Path, name: &str, tree_hash: &str) -> PathBuf {
    packages_dir(depot).join(name).join(version_slug(name, tree_hash))
}

/// Install path of an artifact (keyed directly by its git-tree SHA-1).
pub fn artifact_dir(depot: &Path, tree_hash: &str) -> PathBuf {
    artifacts_dir(depot).join(tree_hash)
}

/// Cache key for a clone of `source`.
pub fn clone_key(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex()[..16].to_string()
}

/// Mirror path for a repo source under one depot.
pub fn clone_dir(depot: &Path, source: &str) -> PathBuf {
    clones_dir(depot).join(clone_key(source))
}

/// Scratch directory for `(uuid, name)` under one depot.
pub fn scratch_dir(depot: &Path, uuid: &uuid::Uuid, name: &str) -> PathBuf {
    scratchspaces_dir(depot).join(uuid.to_string()).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_deterministic_and_distinct() {
        let a = version_slug("Foo", "aaaa");
        assert_eq!(a, version_slug("Foo", "aaaa"));
        assert_ne!(a, version_slug("Foo", "bbbb"));
        assert_ne!(a, version_slug("Bar", "aaaa"));
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn layout_nests_under_depot() {
        let depot = Path::new("/depot");
        let dir = package_dir(depot, "Foo", "abc");
        assert!(dir.starts_with("/depot/packages/Foo"));
        assert_eq!(clone_dir(depot, "https://x").parent().unwrap(), clones_dir(depot));
    }
}
