//! Per-depot usage ledgers.
//!
//! Each depot keeps `logs/{manifest,artifact,scratch}_usage.toml`: a table
//! from file path to a list of `{ time, parent_projects? }` stamps. Reads
//! merge by maximum timestamp per path; writes condense back to one stamp.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::GcError;
use crate::env::atomic_toml_write;
use crate::paths;

/// Ledger category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Manifest,
    Artifact,
    Scratch,
}

impl UsageKind {
    pub const ALL: [UsageKind; 3] = [Self::Manifest, Self::Artifact, Self::Scratch];

    fn log_name(self) -> &'static str {
        match self {
            Self::Manifest => paths::MANIFEST_USAGE,
            Self::Artifact => paths::ARTIFACT_USAGE,
            Self::Scratch => paths::SCRATCH_USAGE,
        }
    }

    /// Scratch ledgers key directories; the others key files.
    pub fn target_exists(self, path: &Path) -> bool {
        match self {
            Self::Scratch => path.is_dir(),
            _ => path.is_file(),
        }
    }
}

/// One stamp in the on-disk list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStamp {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub parent_projects: BTreeSet<PathBuf>,
}

type UsageTable = BTreeMap<PathBuf, Vec<UsageStamp>>;

/// Merged view of one path's usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    pub time: DateTime<Utc>,
    pub parents: BTreeSet<PathBuf>,
}

pub fn usage_file(depot: &Path, kind: UsageKind) -> PathBuf {
    paths::logs_dir(depot).join(kind.log_name())
}

/// Read one depot's ledger, merging stamps per path: maximum timestamp wins,
/// parent sets union. Unreadable or malformed ledgers count as empty.
pub fn read(depot: &Path, kind: UsageKind) -> BTreeMap<PathBuf, Usage> {
    let file = usage_file(depot, kind);
    let table: UsageTable = match std::fs::read_to_string(&file) {
        Ok(content) => match toml::from_str(&content) {
            Ok(table) => table,
            Err(err) => {
                warn!(file = %file.display(), %err, "malformed usage log, treating as empty");
                return BTreeMap::new();
            }
        },
        Err(_) => return BTreeMap::new(),
    };

    let mut merged = BTreeMap::new();
    for (path, stamps) in table {
        for stamp in stamps {
            merge_into(&mut merged, path.clone(), stamp.time, stamp.parent_projects);
        }
    }
    merged
}

/// Fold `(path, usage)` into a merged map.
pub fn merge_into(
    merged: &mut BTreeMap<PathBuf, Usage>,
    path: PathBuf,
    time: DateTime<Utc>,
    parents: BTreeSet<PathBuf>,
) {
    match merged.entry(path) {
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(Usage { time, parents });
        }
        std::collections::btree_map::Entry::Occupied(mut slot) => {
            let usage = slot.get_mut();
            usage.time = usage.time.max(time);
            usage.parents.extend(parents);
        }
    }
}

/// Write one depot's ledger condensed to a single stamp per path.
pub fn write_condensed(
    depot: &Path,
    kind: UsageKind,
    entries: &BTreeMap<PathBuf, Usage>,
) -> Result<(), GcError> {
    let file = usage_file(depot, kind);
    if entries.is_empty() && !file.exists() {
        return Ok(());
    }
    let table: UsageTable = entries
        .iter()
        .map(|(path, usage)| {
            (
                path.clone(),
                vec![UsageStamp {
                    time: usage.time,
                    parent_projects: usage.parents.clone(),
                }],
            )
        })
        .collect();
    atomic_toml_write(&file, &table)?;
    Ok(())
}

/// Append a usage stamp for `target`, preserving existing stamps until the
/// next GC condenses them.
pub fn append(
    depot: &Path,
    kind: UsageKind,
    target: &Path,
    parent: Option<&Path>,
) -> Result<(), GcError> {
    let file = usage_file(depot, kind);
    let mut table: UsageTable = match std::fs::read_to_string(&file) {
        Ok(content) => toml::from_str(&content).unwrap_or_default(),
        Err(_) => UsageTable::default(),
    };
    table.entry(target.to_path_buf()).or_default().push(UsageStamp {
        time: Utc::now(),
        parent_projects: parent.map(Path::to_path_buf).into_iter().collect(),
    });
    atomic_toml_write(&file, &table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn append_twice_reads_as_one_merged_entry() {
        let depot = tempdir().unwrap();
        let target = Path::new("/env/Manifest.toml");
        append(depot.path(), UsageKind::Manifest, target, None).unwrap();
        append(depot.path(), UsageKind::Manifest, target, None).unwrap();

        let merged = read(depot.path(), UsageKind::Manifest);
        assert_eq!(merged.len(), 1);
        assert!(merged.contains_key(target));
    }

    #[test]
    fn condense_roundtrip_preserves_max_mapping() {
        let depot = tempdir().unwrap();
        let mut merged = BTreeMap::new();
        merge_into(&mut merged, PathBuf::from("/a"), at(100), BTreeSet::new());
        merge_into(&mut merged, PathBuf::from("/a"), at(50), BTreeSet::new());
        merge_into(
            &mut merged,
            PathBuf::from("/s"),
            at(70),
            BTreeSet::from([PathBuf::from("/proj/Project.toml")]),
        );

        write_condensed(depot.path(), UsageKind::Scratch, &merged).unwrap();
        let reread = read(depot.path(), UsageKind::Scratch);
        assert_eq!(reread, merged);
        assert_eq!(reread[Path::new("/a")].time, at(100));
    }

    #[test]
    fn malformed_log_reads_empty() {
        let depot = tempdir().unwrap();
        let file = usage_file(depot.path(), UsageKind::Artifact);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "not toml [[[").unwrap();
        assert!(read(depot.path(), UsageKind::Artifact).is_empty());
    }
}
