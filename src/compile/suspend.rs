//! Persistence of precompile suspensions.
//!
//! Packages that errored during precompile are remembered across invocations
//! in a scratch file keyed by (project file, runtime version), so implicit
//! precompile runs can short-circuit known-broken packages.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::CompileError;
use crate::env::atomic_toml_write;
use crate::gc::usage::{self, UsageKind};
use crate::paths;
use crate::types::PackageId;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SuspendFile {
    #[serde(default)]
    packages: Vec<PackageId>,
}

fn tool_uuid() -> Uuid {
    Uuid::parse_str(crate::TOOL_UUID).expect("TOOL_UUID is a valid uuid")
}

fn suspend_dir(depot: &Path) -> PathBuf {
    paths::scratch_dir(depot, &tool_uuid(), "precompile_suspended")
}

/// File for one (project, runtime version) pair.
pub fn suspend_file(depot: &Path, project_file: &Path, runtime_version: &str) -> PathBuf {
    let mut hasher = blake3::Hasher::new();
    hasher.update(project_file.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(runtime_version.as_bytes());
    let key = &hasher.finalize().to_hex()[..16];
    suspend_dir(depot).join(format!("{key}.toml"))
}

/// Load the suspended set; unreadable files count as empty.
pub fn load(depot: &Path, project_file: &Path, runtime_version: &str) -> BTreeSet<PackageId> {
    let file = suspend_file(depot, project_file, runtime_version);
    match std::fs::read_to_string(&file) {
        Ok(content) => toml::from_str::<SuspendFile>(&content)
            .map(|f| f.packages.into_iter().collect())
            .unwrap_or_else(|err| {
                warn!(file = %file.display(), %err, "malformed suspension file, ignoring");
                BTreeSet::new()
            }),
        Err(_) => BTreeSet::new(),
    }
}

/// Persist the suspended set and stamp the scratch space as used by this
/// project.
pub fn save(
    depot: &Path,
    project_file: &Path,
    runtime_version: &str,
    suspended: &BTreeSet<PackageId>,
) -> Result<(), CompileError> {
    let file = suspend_file(depot, project_file, runtime_version);
    let contents = SuspendFile {
        packages: suspended.iter().cloned().collect(),
    };
    atomic_toml_write(&file, &contents)?;
    if let Err(err) = usage::append(depot, UsageKind::Scratch, &suspend_dir(depot), Some(project_file)) {
        warn!(%err, "could not record suspension scratch usage");
    }
    Ok(())
}

/// Forget all suspensions for this (project, runtime version).
pub fn clear(depot: &Path, project_file: &Path, runtime_version: &str) {
    let file = suspend_file(depot, project_file, runtime_version);
    if file.exists() {
        if let Err(err) = std::fs::remove_file(&file) {
            warn!(file = %file.display(), %err, "could not clear suspension file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_load_clear_cycle() {
        let depot = tempdir().unwrap();
        let project = Path::new("/env/Project.toml");

        assert!(load(depot.path(), project, "1.11.0").is_empty());

        let mut suspended = BTreeSet::new();
        suspended.insert(PackageId::new("Broken", Uuid::new_v4()));
        save(depot.path(), project, "1.11.0", &suspended).unwrap();

        assert_eq!(load(depot.path(), project, "1.11.0"), suspended);
        // A different runtime version sees a different file.
        assert!(load(depot.path(), project, "1.12.0").is_empty());

        clear(depot.path(), project, "1.11.0");
        assert!(load(depot.path(), project, "1.11.0").is_empty());
    }
}
