//! Reachability marking.
//!
//! `mark` runs a processing function over index files (manifests, artifact
//! indexes, scratch directories) and unions every content path they
//! reference. Ordering across the marker variants is load-bearing: packages
//! are marked first because artifact and scratch marking consult the pending
//! package-deletion set.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::paths;
use crate::types::Manifest;

/// Result of one marking pass.
#[derive(Debug, Default)]
pub struct MarkResult {
    /// Union of all referenced content paths.
    pub marked: HashSet<PathBuf>,
    /// Index files whose processing produced a reference list.
    pub active: HashSet<PathBuf>,
}

/// Run `process` over `index_files`; a `None` return means the file was
/// unreadable or deliberately skipped and is left out of `active`.
pub fn mark<F>(process: F, index_files: impl IntoIterator<Item = PathBuf>) -> MarkResult
where
    F: Fn(&Path) -> Option<Vec<PathBuf>>,
{
    let mut result = MarkResult::default();
    for index_file in index_files {
        if let Some(paths) = process(&index_file) {
            result.marked.extend(paths);
            result.active.insert(index_file);
        }
    }
    result
}

fn read_manifest(path: &Path) -> Option<Manifest> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Mark package install dirs referenced by a manifest, under every depot.
pub fn package_refs(depots: &[PathBuf]) -> impl Fn(&Path) -> Option<Vec<PathBuf>> + '_ {
    move |manifest_file: &Path| {
        let manifest = read_manifest(manifest_file)?;
        let mut refs = Vec::new();
        for entry in manifest.packages.values() {
            if let Some(tree_hash) = &entry.tree_hash {
                for depot in depots {
                    refs.push(paths::package_dir(depot, &entry.name, tree_hash));
                }
            }
        }
        Some(refs)
    }
}

/// Mark clone mirrors referenced by a manifest, under every depot.
pub fn repo_refs(depots: &[PathBuf]) -> impl Fn(&Path) -> Option<Vec<PathBuf>> + '_ {
    move |manifest_file: &Path| {
        let manifest = read_manifest(manifest_file)?;
        let mut refs = Vec::new();
        for entry in manifest.packages.values() {
            if let Some(repo) = &entry.repo {
                for depot in depots {
                    refs.push(paths::clone_dir(depot, &repo.source));
                }
            }
        }
        Some(refs)
    }
}

/// One artifact in an Artifacts.toml: either platform-independent or a list
/// of platform-keyed variants.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArtifactIndexEntry {
    Single(ArtifactMeta),
    Platforms(Vec<ArtifactMeta>),
}

#[derive(Debug, Deserialize)]
struct ArtifactMeta {
    #[serde(rename = "git-tree-sha1")]
    tree_sha1: String,
}

fn is_under_any(path: &Path, roots: &HashSet<PathBuf>) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Mark artifact dirs referenced by an Artifacts.toml.
///
/// Index files living inside a package already scheduled for deletion are
/// skipped so their artifacts can be orphaned along with the package.
pub fn artifact_refs<'a>(
    depots: &'a [PathBuf],
    packages_to_delete: &'a HashSet<PathBuf>,
) -> impl Fn(&Path) -> Option<Vec<PathBuf>> + 'a {
    move |index_file: &Path| {
        if is_under_any(index_file, packages_to_delete) {
            return None;
        }
        let content = std::fs::read_to_string(index_file).ok()?;
        let index: BTreeMap<String, ArtifactIndexEntry> = toml::from_str(&content).ok()?;

        let mut refs = Vec::new();
        for entry in index.values() {
            let metas: Vec<&ArtifactMeta> = match entry {
                ArtifactIndexEntry::Single(meta) => vec![meta],
                ArtifactIndexEntry::Platforms(metas) => metas.iter().collect(),
            };
            for meta in metas {
                for depot in depots {
                    refs.push(paths::artifact_dir(depot, &meta.tree_sha1));
                }
            }
        }
        Some(refs)
    }
}

/// Mark scratch spaces that still have a live parent project.
///
/// A scratch directory whose parents all sit under packages scheduled for
/// deletion is skipped; anything else marks itself.
pub fn scratch_refs<'a>(
    parents: &'a BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    packages_to_delete: &'a HashSet<PathBuf>,
) -> impl Fn(&Path) -> Option<Vec<PathBuf>> + 'a {
    move |scratch_dir: &Path| {
        if let Some(parent_projects) = parents.get(scratch_dir) {
            let all_doomed = !parent_projects.is_empty()
                && parent_projects
                    .iter()
                    .all(|parent| is_under_any(parent, packages_to_delete));
            if all_doomed {
                return None;
            }
        }
        Some(vec![scratch_dir.to_path_buf()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManifestEntry;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn mark_skips_unreadable_index_files() {
        let result = mark(
            |_p| None,
            [PathBuf::from("/missing/Manifest.toml")],
        );
        assert!(result.marked.is_empty());
        assert!(result.active.is_empty());
    }

    #[test]
    fn package_refs_marks_slug_paths_in_every_depot() {
        let dir = tempdir().unwrap();
        let manifest_file = dir.path().join("Manifest.toml");
        let mut manifest = Manifest::default();
        let mut entry = ManifestEntry::new("Foo");
        entry.tree_hash = Some("ab12".into());
        manifest.packages.insert(Uuid::new_v4(), entry);
        std::fs::write(&manifest_file, toml::to_string(&manifest).unwrap()).unwrap();

        let depots = vec![PathBuf::from("/d1"), PathBuf::from("/d2")];
        let result = mark(package_refs(&depots), [manifest_file.clone()]);
        assert_eq!(result.marked.len(), 2);
        assert!(result.active.contains(&manifest_file));
        assert!(result
            .marked
            .contains(&paths::package_dir(Path::new("/d1"), "Foo", "ab12")));
    }

    #[test]
    fn artifact_refs_skips_doomed_package_dirs() {
        let dir = tempdir().unwrap();
        let pkg_dir = dir.path().join("packages/Foo/abc");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        let index_file = pkg_dir.join("Artifacts.toml");
        std::fs::write(&index_file, "[blob]\ngit-tree-sha1 = \"ffee\"\n").unwrap();

        let depots = vec![dir.path().to_path_buf()];
        let nothing_doomed = HashSet::new();
        let result = mark(artifact_refs(&depots, &nothing_doomed), [index_file.clone()]);
        assert_eq!(result.marked.len(), 1);

        let doomed = HashSet::from([pkg_dir]);
        let result = mark(artifact_refs(&depots, &doomed), [index_file]);
        assert!(result.marked.is_empty());
        assert!(result.active.is_empty());
    }

    #[test]
    fn platform_keyed_artifact_lists_are_walked() {
        let dir = tempdir().unwrap();
        let index_file = dir.path().join("Artifacts.toml");
        std::fs::write(
            &index_file,
            r#"
[[blob]]
git-tree-sha1 = "aaaa"

[[blob]]
git-tree-sha1 = "bbbb"
"#,
        )
        .unwrap();

        let depots = vec![PathBuf::from("/d")];
        let none = HashSet::new();
        let result = mark(artifact_refs(&depots, &none), [index_file]);
        assert_eq!(result.marked.len(), 2);
    }

    #[test]
    fn scratch_refs_keeps_spaces_with_live_parents() {
        let scratch = PathBuf::from("/d/scratchspaces/u/name");
        let live_parent = PathBuf::from("/proj/Project.toml");
        let doomed_pkg = PathBuf::from("/d/packages/Foo/abc");
        let doomed_parent = doomed_pkg.join("Project.toml");

        let mut parents = BTreeMap::new();
        parents.insert(scratch.clone(), BTreeSet::from([live_parent]));
        let doomed = HashSet::from([doomed_pkg]);

        let result = mark(scratch_refs(&parents, &doomed), [scratch.clone()]);
        assert!(result.marked.contains(&scratch));

        parents.insert(scratch.clone(), BTreeSet::from([doomed_parent]));
        let result = mark(scratch_refs(&parents, &doomed), [scratch.clone()]);
        assert!(result.marked.is_empty());
    }
}
