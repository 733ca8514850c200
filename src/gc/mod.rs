//! Garbage collection across the depot stack.
//!
//! One sweep reads every depot's usage ledgers, marks reachable content from
//! the recorded manifests and artifact indexes, feeds unreachable paths
//! through the orphanage grace period, and deletes only what stayed
//! unreachable for the whole `collect_delay`.

pub mod mark;
pub mod orphanage;
pub mod usage;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::env::EnvError;
use crate::paths;
use crate::ui::Reporter;
use orphanage::Orphanage;
use usage::{Usage, UsageKind};

#[derive(Error, Debug)]
pub enum GcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvError),
}

#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Grace period before an unreachable path may be deleted.
    pub collect_delay: Duration,
    pub verbose: bool,
    /// Sweep timestamp override; tests advance the clock through this.
    pub now: Option<DateTime<Utc>>,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            collect_delay: Duration::days(7),
            verbose: false,
            now: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryStats {
    pub deleted: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub packages: CategoryStats,
    pub artifacts: CategoryStats,
    pub clones: CategoryStats,
    pub scratch: CategoryStats,
}

impl GcStats {
    pub fn total_bytes(&self) -> u64 {
        self.packages.bytes + self.artifacts.bytes + self.clones.bytes + self.scratch.bytes
    }
}

/// Run a full sweep over `depots`.
pub fn run(
    depots: &[PathBuf],
    reporter: &dyn Reporter,
    options: &GcOptions,
) -> Result<GcStats, GcError> {
    let now = options.now.unwrap_or_else(Utc::now);
    reporter.section("Collecting garbage");

    // Steps 1-2: read every ledger, drop entries whose target is gone, and
    // union across depots per category.
    let mut per_depot: Vec<[BTreeMap<PathBuf, Usage>; 3]> = Vec::with_capacity(depots.len());
    let mut merged: [BTreeMap<PathBuf, Usage>; 3] = Default::default();
    for depot in depots {
        let mut tables: [BTreeMap<PathBuf, Usage>; 3] = Default::default();
        for (slot, kind) in UsageKind::ALL.into_iter().enumerate() {
            let mut table = usage::read(depot, kind);
            table.retain(|path, _| kind.target_exists(path));
            if kind == UsageKind::Scratch {
                table.retain(|_, entry| {
                    entry.parents.retain(|parent| parent.is_file());
                    !entry.parents.is_empty()
                });
            }
            for (path, entry) in &table {
                usage::merge_into(
                    &mut merged[slot],
                    path.clone(),
                    entry.time,
                    entry.parents.clone(),
                );
            }
            tables[slot] = table;
        }
        per_depot.push(tables);
    }

    // Step 3: rewrite each depot's ledgers condensed, filters applied.
    for (depot, tables) in depots.iter().zip(&per_depot) {
        for (slot, kind) in UsageKind::ALL.into_iter().enumerate() {
            usage::write_condensed(depot, kind, &tables[slot])?;
        }
    }

    let manifest_files: Vec<PathBuf> = merged[0].keys().cloned().collect();
    let artifact_index_files: Vec<PathBuf> = merged[1].keys().cloned().collect();
    let scratch_parents: BTreeMap<PathBuf, BTreeSet<PathBuf>> = merged[2]
        .iter()
        .map(|(path, entry)| (path.clone(), entry.parents.clone()))
        .collect();
    let scratch_dirs: Vec<PathBuf> = merged[2].keys().cloned().collect();

    // Step 4: packages reachable from any known manifest.
    let package_mark = mark::mark(mark::package_refs(depots), manifest_files.clone());
    debug!(
        reachable = package_mark.marked.len(),
        manifests = package_mark.active.len(),
        "package marking done"
    );

    // Step 5: preliminary package-deletion set. This pass runs with an empty
    // orphanage so it reflects only this sweep's reachability; the per-depot
    // grace-period computation below decides actual deletion.
    let mut preliminary = Vec::new();
    {
        let mut discarded = Orphanage::new();
        let candidates = depots
            .iter()
            .flat_map(|depot| enumerate_two_level(&paths::packages_dir(depot)))
            .filter(|dir| !package_mark.marked.contains(dir));
        orphanage::merge(
            &mut discarded,
            candidates,
            &mut preliminary,
            &Orphanage::new(),
            now,
            options.collect_delay,
        );
    }
    let packages_to_delete: HashSet<PathBuf> = preliminary.into_iter().collect();

    // Step 6: artifact, clone and scratch marking. Ordering matters; both
    // artifact and scratch marking consult `packages_to_delete`.
    let artifact_mark = mark::mark(
        mark::artifact_refs(depots, &packages_to_delete),
        artifact_index_files,
    );
    let clone_mark = mark::mark(mark::repo_refs(depots), manifest_files);
    let scratch_mark = mark::mark(
        mark::scratch_refs(&scratch_parents, &packages_to_delete),
        scratch_dirs,
    );

    // Steps 7-9: per depot, fold orphan candidates through the grace period
    // and delete what has aged out.
    let mut stats = GcStats::default();
    for depot in depots {
        let old = orphanage::load(depot);
        let mut new = Orphanage::new();
        let mut doomed: [Vec<PathBuf>; 4] = Default::default();

        let candidate_sets: [(Vec<PathBuf>, &HashSet<PathBuf>); 4] = [
            (
                enumerate_two_level(&paths::packages_dir(depot)),
                &package_mark.marked,
            ),
            (
                subdirs(&paths::artifacts_dir(depot)),
                &artifact_mark.marked,
            ),
            (subdirs(&paths::clones_dir(depot)), &clone_mark.marked),
            (
                enumerate_two_level(&paths::scratchspaces_dir(depot)),
                &scratch_mark.marked,
            ),
        ];
        for (slot, (enumerated, keep)) in candidate_sets.into_iter().enumerate() {
            orphanage::merge(
                &mut new,
                enumerated.into_iter().filter(|dir| !keep.contains(dir)),
                &mut doomed[slot],
                &old,
                now,
                options.collect_delay,
            );
        }

        // Deleted paths leave the orphanage with the deletion.
        for list in &doomed {
            for path in list {
                new.remove(path);
            }
        }
        orphanage::store(depot, &new)?;

        let [pkgs, artifacts, clones, scratch] = doomed;
        delete_paths(&pkgs, &mut stats.packages, reporter, options.verbose);
        delete_paths(&artifacts, &mut stats.artifacts, reporter, options.verbose);
        delete_paths(&clones, &mut stats.clones, reporter, options.verbose);
        delete_paths(&scratch, &mut stats.scratch, reporter, options.verbose);

        // Step 10: drop now-empty per-name and per-uuid containers.
        prune_empty_children(&paths::packages_dir(depot));
        prune_empty_children(&paths::scratchspaces_dir(depot));
    }

    reporter.info(&format!(
        "freed {} bytes ({} packages, {} artifacts, {} clones, {} scratchspaces)",
        stats.total_bytes(),
        stats.packages.deleted,
        stats.artifacts.deleted,
        stats.clones.deleted,
        stats.scratch.deleted,
    ));
    Ok(stats)
}

/// Immediate child directories, empty if the root is unreadable.
fn subdirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}

/// Grandchild directories (`root/*/*`), e.g. `packages/<name>/<slug>`.
fn enumerate_two_level(root: &Path) -> Vec<PathBuf> {
    subdirs(root)
        .iter()
        .flat_map(|child| subdirs(child))
        .collect()
}

fn recursive_size(path: &Path) -> u64 {
    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if metadata.is_dir() {
        subdirs_and_files(path)
            .iter()
            .map(|child| recursive_size(child))
            .sum()
    } else {
        metadata.len()
    }
}

fn subdirs_and_files(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default()
}

/// Best-effort deletion: a failure is logged and the sweep continues.
fn delete_paths(
    paths: &[PathBuf],
    stats: &mut CategoryStats,
    reporter: &dyn Reporter,
    verbose: bool,
) {
    for path in paths {
        let size = recursive_size(path);
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => {
                stats.deleted += 1;
                stats.bytes += size;
                if verbose {
                    reporter.item(&format!("deleted {}", path.display()));
                }
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to delete, continuing");
                reporter.warning(&format!("could not delete {}: {err}", path.display()));
            }
        }
    }
}

fn prune_empty_children(root: &Path) {
    for child in subdirs(root) {
        // remove_dir refuses non-empty directories, which is the filter.
        let _ = std::fs::remove_dir(&child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::SilentReporter;

    #[test]
    fn enumerate_two_level_lists_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Foo/abc")).unwrap();
        std::fs::create_dir_all(dir.path().join("Bar/def")).unwrap();
        std::fs::write(dir.path().join("Foo/file"), b"x").unwrap();

        let found = enumerate_two_level(dir.path());
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn sweep_of_empty_depot_is_clean() {
        let depot = tempfile::tempdir().unwrap();
        let depots = vec![depot.path().to_path_buf()];
        let stats = run(&depots, &SilentReporter, &GcOptions::default()).unwrap();
        assert_eq!(stats.total_bytes(), 0);
    }

    #[test]
    fn recursive_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/one"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("a/b/two"), vec![0u8; 32]).unwrap();
        assert_eq!(recursive_size(dir.path()), 42);
    }
}
