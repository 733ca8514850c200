//! The orphanage: per-depot grace-period state for unreachable content.
//!
//! A path enters the orphanage the first time a GC run finds it unreachable
//! and leaves when it disappears from disk or becomes reachable again. Only
//! paths that stayed continuously unreachable for the whole grace period move
//! to the deletion list.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use super::GcError;
use crate::env::atomic_toml_write;
use crate::paths;

/// path → first time observed unreachable.
pub type Orphanage = BTreeMap<PathBuf, DateTime<Utc>>;

pub fn orphanage_file(depot: &Path) -> PathBuf {
    paths::logs_dir(depot).join(paths::ORPHANED)
}

/// Load a depot's orphanage; unreadable or malformed files count as empty.
pub fn load(depot: &Path) -> Orphanage {
    let file = orphanage_file(depot);
    match std::fs::read_to_string(&file) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|err| {
            warn!(file = %file.display(), %err, "malformed orphanage, treating as empty");
            Orphanage::new()
        }),
        Err(_) => Orphanage::new(),
    }
}

/// Persist a depot's orphanage atomically.
///
/// An empty orphanage is still written when a file already exists, so stale
/// entries from earlier runs get truncated.
pub fn store(depot: &Path, orphanage: &Orphanage) -> Result<(), GcError> {
    let file = orphanage_file(depot);
    if orphanage.is_empty() && !file.exists() {
        return Ok(());
    }
    atomic_toml_write(&file, orphanage)?;
    Ok(())
}

/// Fold this run's orphan candidates into `new`.
///
/// A candidate keeps its first-observed time from `old` (or gets `now` on
/// first sight); candidates orphaned for at least `collect_delay` go on the
/// deletion list. Paths reachable again simply do not appear in `candidates`
/// and therefore drop out of `new`.
pub fn merge(
    new: &mut Orphanage,
    candidates: impl IntoIterator<Item = PathBuf>,
    deletion_list: &mut Vec<PathBuf>,
    old: &Orphanage,
    now: DateTime<Utc>,
    collect_delay: Duration,
) {
    for path in candidates {
        let free_time = old.get(&path).copied().unwrap_or(now);
        if now - free_time >= collect_delay {
            deletion_list.push(path.clone());
        }
        new.insert(path, free_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_orphan_waits_out_the_grace_period() {
        let now = Utc::now();
        let delay = Duration::days(7);
        let mut new = Orphanage::new();
        let mut deletions = Vec::new();

        merge(
            &mut new,
            [PathBuf::from("/depot/packages/Foo/abc")],
            &mut deletions,
            &Orphanage::new(),
            now,
            delay,
        );
        assert!(deletions.is_empty());
        assert_eq!(new[Path::new("/depot/packages/Foo/abc")], now);

        // Second sweep, eight days later.
        let mut second = Orphanage::new();
        merge(
            &mut second,
            [PathBuf::from("/depot/packages/Foo/abc")],
            &mut deletions,
            &new,
            now + Duration::days(8),
            delay,
        );
        assert_eq!(deletions, vec![PathBuf::from("/depot/packages/Foo/abc")]);
        // First-observed time survives the merge.
        assert_eq!(second[Path::new("/depot/packages/Foo/abc")], now);
    }

    #[test]
    fn store_roundtrip() {
        let depot = tempdir().unwrap();
        let mut orphanage = Orphanage::new();
        orphanage.insert(PathBuf::from("/depot/artifacts/ff00"), Utc::now());

        store(depot.path(), &orphanage).unwrap();
        let reread = load(depot.path());
        assert_eq!(reread.len(), 1);
        assert!(reread.contains_key(Path::new("/depot/artifacts/ff00")));
    }

    #[test]
    fn empty_store_truncates_existing_file_only() {
        let depot = tempdir().unwrap();
        // No file, empty orphanage: nothing created.
        store(depot.path(), &Orphanage::new()).unwrap();
        assert!(!orphanage_file(depot.path()).exists());

        let mut orphanage = Orphanage::new();
        orphanage.insert(PathBuf::from("/p"), Utc::now());
        store(depot.path(), &orphanage).unwrap();

        store(depot.path(), &Orphanage::new()).unwrap();
        assert!(load(depot.path()).is_empty());
        assert!(orphanage_file(depot.path()).exists());
    }
}
