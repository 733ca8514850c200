//! Environment cache: the parsed project/manifest pair for one environment.
//!
//! Loaded once per operation, mutated in memory, written back atomically.
//! The `original_*` copies capture on-disk state at load time and drive both
//! `status` diffs and the undo-skip decision.

pub mod undo;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::manifest::ManifestError;
use crate::types::{Manifest, PackageSpec, Project};

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("the following package names could not be resolved: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error("package {0} not found in the environment")]
    NotInEnvironment(String),
}

/// Write a TOML document atomically: temp file in the target directory, then
/// rename over the destination.
pub fn atomic_toml_write<T: Serialize>(path: &Path, value: &T) -> Result<(), EnvError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let content = toml::to_string_pretty(value)?;
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::fs::write(tmp.path(), content)?;
    tmp.persist(path).map_err(|e| EnvError::Io(e.error))?;
    Ok(())
}

fn read_toml_or_default<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, EnvError> {
    if !path.is_file() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// The in-memory view of one environment.
#[derive(Debug, Clone)]
pub struct EnvCache {
    pub project_file: PathBuf,
    pub manifest_file: PathBuf,
    pub project: Project,
    pub manifest: Manifest,
    pub original_project: Project,
    pub original_manifest: Manifest,
}

impl EnvCache {
    /// Load the environment at `path` (a directory or a project file).
    pub fn load(path: &Path) -> Result<Self, EnvError> {
        let project_file = if path.extension().is_some_and(|ext| ext == "toml") {
            path.to_path_buf()
        } else {
            path.join("Project.toml")
        };
        let manifest_file = project_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("Manifest.toml");

        let project: Project = read_toml_or_default(&project_file)?;
        let manifest: Manifest = read_toml_or_default(&manifest_file)?;

        Ok(Self {
            project_file,
            manifest_file,
            original_project: project.clone(),
            original_manifest: manifest.clone(),
            project,
            manifest,
        })
    }

    /// Persist project and manifest atomically.
    pub fn write(&self) -> Result<(), EnvError> {
        self.manifest.assert_closed()?;
        atomic_toml_write(&self.project_file, &self.project)?;
        atomic_toml_write(&self.manifest_file, &self.manifest)?;
        Ok(())
    }

    /// Whether the in-memory state still matches what was loaded.
    pub fn is_unchanged(&self) -> bool {
        self.project == self.original_project && self.manifest == self.original_manifest
    }

    /// Sync the `original_*` copies to the current state, e.g. after a write
    /// made the in-memory state the on-disk truth.
    pub fn mark_clean(&mut self) {
        self.original_project = self.project.clone();
        self.original_manifest = self.manifest.clone();
    }

    /// Fill missing halves of specs from the project's direct dependencies.
    pub fn resolve_project_deps(&self, specs: &mut [PackageSpec]) -> Result<(), EnvError> {
        for spec in specs.iter_mut() {
            match (&spec.name, spec.uuid) {
                (Some(name), None) => spec.uuid = self.project.find_uuid(name),
                (None, Some(uuid)) => {
                    spec.name = self.project.find_name(uuid).map(str::to_string)
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Fill missing halves of specs from the manifest.
    pub fn resolve_manifest(&self, specs: &mut [PackageSpec]) -> Result<(), EnvError> {
        for spec in specs.iter_mut() {
            match (&spec.name, spec.uuid) {
                (Some(name), None) => spec.uuid = self.manifest.find_by_name(name)?,
                (None, Some(uuid)) => {
                    spec.name = self.manifest.get(uuid).map(|e| e.name.clone())
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Terminal check: every spec must carry a uuid by now.
    pub fn ensure_resolved(&self, specs: &[PackageSpec]) -> Result<(), EnvError> {
        let offenders: Vec<String> = specs
            .iter()
            .filter(|s| s.uuid.is_none())
            .map(|s| s.display_name())
            .collect();
        if offenders.is_empty() {
            Ok(())
        } else {
            Err(EnvError::Unresolved(offenders))
        }
    }

    /// The manifest entry for a resolved spec, or `NotInEnvironment`.
    pub fn require_entry(&self, spec: &PackageSpec) -> Result<Uuid, EnvError> {
        let uuid = spec
            .uuid
            .ok_or_else(|| EnvError::NotInEnvironment(spec.display_name()))?;
        if self.manifest.get(uuid).is_none() {
            return Err(EnvError::NotInEnvironment(spec.display_name()));
        }
        Ok(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManifestEntry;
    use tempfile::tempdir;

    #[test]
    fn load_missing_files_gives_empty_env() {
        let dir = tempdir().unwrap();
        let env = EnvCache::load(dir.path()).unwrap();
        assert!(env.project.deps.is_empty());
        assert!(env.manifest.packages.is_empty());
        assert!(env.is_unchanged());
    }

    #[test]
    fn write_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let mut env = EnvCache::load(dir.path()).unwrap();

        let uuid = Uuid::new_v4();
        env.project.deps.insert("Foo".into(), uuid);
        env.manifest.packages.insert(uuid, ManifestEntry::new("Foo"));
        env.write().unwrap();

        let reloaded = EnvCache::load(dir.path()).unwrap();
        assert_eq!(reloaded.project, env.project);
        assert_eq!(reloaded.manifest, env.manifest);
    }

    #[test]
    fn write_rejects_open_manifest() {
        let dir = tempdir().unwrap();
        let mut env = EnvCache::load(dir.path()).unwrap();

        let mut entry = ManifestEntry::new("Foo");
        entry.deps.insert("Missing".into(), Uuid::new_v4());
        env.manifest.packages.insert(Uuid::new_v4(), entry);
        assert!(env.write().is_err());
    }

    #[test]
    fn resolve_fills_uuid_from_project() {
        let dir = tempdir().unwrap();
        let mut env = EnvCache::load(dir.path()).unwrap();
        let uuid = Uuid::new_v4();
        env.project.deps.insert("Foo".into(), uuid);

        let mut specs = vec![PackageSpec::by_name("Foo")];
        env.resolve_project_deps(&mut specs).unwrap();
        assert_eq!(specs[0].uuid, Some(uuid));
        env.ensure_resolved(&specs).unwrap();
    }

    #[test]
    fn ensure_resolved_lists_offenders() {
        let dir = tempdir().unwrap();
        let env = EnvCache::load(dir.path()).unwrap();
        let specs = vec![PackageSpec::by_name("Nope")];
        match env.ensure_resolved(&specs) {
            Err(EnvError::Unresolved(names)) => assert_eq!(names, vec!["Nope".to_string()]),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
