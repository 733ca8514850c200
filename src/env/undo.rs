//! Per-environment undo history.
//!
//! A bounded ring of (project, manifest) snapshots keyed by project file.
//! Index 1 is the most recent snapshot; `undo` walks toward older entries,
//! `redo` back toward newer ones.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::EnvCache;
use crate::types::{Manifest, Project};

/// Snapshots kept per environment.
const MAX_UNDO: usize = 50;

#[derive(Error, Debug)]
pub enum UndoError {
    #[error("no states left to undo")]
    NothingToUndo,

    #[error("no states left to redo")]
    NothingToRedo,
}

#[derive(Debug, Clone)]
pub struct UndoSnapshot {
    pub time: DateTime<Utc>,
    pub project: Project,
    pub manifest: Manifest,
}

#[derive(Debug, Default)]
struct UndoState {
    /// 1-based position of the materialised snapshot in `entries`.
    index: usize,
    entries: Vec<UndoSnapshot>,
}

/// All undo state owned by the runtime.
#[derive(Debug, Default)]
pub struct UndoLog {
    states: HashMap<PathBuf, UndoState>,
}

impl UndoLog {
    /// Record the environment's current state.
    ///
    /// No-op when nothing changed since load. Any redo tail (entries newer
    /// than the current index) is discarded, the new snapshot is prepended,
    /// and the ring is clamped to [`MAX_UNDO`].
    pub fn snapshot(&mut self, env: &EnvCache) {
        if env.is_unchanged() {
            return;
        }
        let state = self.states.entry(env.project_file.clone()).or_default();

        // Seed the ring with the pre-mutation state so the first undo of a
        // fresh history has somewhere to go.
        if state.entries.is_empty() {
            state.entries.push(UndoSnapshot {
                time: Utc::now(),
                project: env.original_project.clone(),
                manifest: env.original_manifest.clone(),
            });
        } else if state.index > 1 {
            state.entries.drain(..state.index - 1);
        }

        state.entries.insert(
            0,
            UndoSnapshot {
                time: Utc::now(),
                project: env.project.clone(),
                manifest: env.manifest.clone(),
            },
        );
        state.index = 1;
        state.entries.truncate(MAX_UNDO);
    }

    /// Step one snapshot toward older history, materialising it into `env`.
    pub fn undo(&mut self, env: &mut EnvCache) -> Result<(), UndoError> {
        let state = self
            .states
            .get_mut(&env.project_file)
            .ok_or(UndoError::NothingToUndo)?;
        if state.index >= state.entries.len() {
            return Err(UndoError::NothingToUndo);
        }
        state.index += 1;
        materialise(&state.entries[state.index - 1], env);
        Ok(())
    }

    /// Step one snapshot toward newer history.
    pub fn redo(&mut self, env: &mut EnvCache) -> Result<(), UndoError> {
        let state = self
            .states
            .get_mut(&env.project_file)
            .ok_or(UndoError::NothingToRedo)?;
        if state.index <= 1 {
            return Err(UndoError::NothingToRedo);
        }
        state.index -= 1;
        materialise(&state.entries[state.index - 1], env);
        Ok(())
    }
}

fn materialise(snapshot: &UndoSnapshot, env: &mut EnvCache) {
    env.project = snapshot.project.clone();
    env.manifest = snapshot.manifest.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn env_with_dep(dir: &std::path::Path, name: &str) -> EnvCache {
        let mut env = EnvCache::load(dir).unwrap();
        env.project.deps.insert(name.into(), Uuid::new_v4());
        env
    }

    #[test]
    fn snapshot_skips_unchanged() {
        let dir = tempdir().unwrap();
        let env = EnvCache::load(dir.path()).unwrap();
        let mut log = UndoLog::default();
        log.snapshot(&env);
        assert!(log.states.is_empty());
    }

    #[test]
    fn undo_then_redo_is_identity() {
        let dir = tempdir().unwrap();
        let mut log = UndoLog::default();

        let mut env = env_with_dep(dir.path(), "Foo");
        log.snapshot(&env);
        let with_foo = env.project.clone();

        env.mark_clean();
        env.project.deps.insert("Bar".into(), Uuid::new_v4());
        log.snapshot(&env);
        let with_bar = env.project.clone();

        log.undo(&mut env).unwrap();
        assert_eq!(env.project, with_foo);
        log.redo(&mut env).unwrap();
        assert_eq!(env.project, with_bar);
    }

    #[test]
    fn undo_reaches_pre_mutation_state() {
        let dir = tempdir().unwrap();
        let mut log = UndoLog::default();
        let mut env = env_with_dep(dir.path(), "Foo");
        log.snapshot(&env);

        log.undo(&mut env).unwrap();
        assert!(env.project.deps.is_empty());
        assert!(matches!(log.undo(&mut env), Err(UndoError::NothingToUndo)));
    }

    #[test]
    fn mutation_after_undo_drops_redo_tail() {
        let dir = tempdir().unwrap();
        let mut log = UndoLog::default();
        let mut env = env_with_dep(dir.path(), "Foo");
        log.snapshot(&env);

        env.mark_clean();
        env.project.deps.insert("Bar".into(), Uuid::new_v4());
        log.snapshot(&env);

        log.undo(&mut env).unwrap();
        env.mark_clean();
        env.project.deps.insert("Baz".into(), Uuid::new_v4());
        log.snapshot(&env);

        assert!(matches!(log.redo(&mut env), Err(UndoError::NothingToRedo)));
    }
}
