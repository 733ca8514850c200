//! Process-wide state as an explicit value.
//!
//! Everything that would otherwise be a global (the active environment path,
//! undo history, depot stack, env-var configuration) lives on `Runtime` and
//! is threaded through operation calls.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::env::undo::UndoLog;
use crate::env::EnvCache;
use crate::gc::usage::{self, UsageKind};
use crate::paths;

/// Configuration read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub depots: Vec<PathBuf>,
    /// `JULIA_PKG_PRECOMPILE_AUTO`: precompile automatically after mutations.
    pub precompile_auto: bool,
    /// `JULIA_NUM_PRECOMPILE_TASKS`: scheduler concurrency.
    pub num_precompile_tasks: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let precompile_auto = std::env::var("JULIA_PKG_PRECOMPILE_AUTO")
            .map(|v| v != "0")
            .unwrap_or(true);
        let num_precompile_tasks = std::env::var("JULIA_NUM_PRECOMPILE_TASKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or_else(default_precompile_tasks);
        Self {
            depots: crate::depot_paths(),
            precompile_auto,
            num_precompile_tasks,
        }
    }
}

fn default_precompile_tasks() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() + 1)
        .unwrap_or(2)
}

#[derive(Debug)]
pub struct Runtime {
    pub config: Config,
    active_env: PathBuf,
    pub undo: UndoLog,
}

impl Runtime {
    pub fn new(config: Config, active_env: PathBuf) -> Self {
        Self {
            config,
            active_env,
            undo: UndoLog::default(),
        }
    }

    /// The environment operations act on (a directory or project file path).
    pub fn active_env(&self) -> &Path {
        &self.active_env
    }

    /// Depot that receives new content and log entries.
    pub fn primary_depot(&self) -> &Path {
        self.config
            .depots
            .first()
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("."))
    }

    /// Switch the active environment, returning the previous one.
    pub fn activate(&mut self, path: PathBuf) -> PathBuf {
        std::mem::replace(&mut self.active_env, path)
    }

    /// Run `f` against `path` as the active environment, restoring the
    /// previous environment on every exit path.
    pub fn with_activated<R>(
        &mut self,
        path: PathBuf,
        f: impl FnOnce(&mut Runtime) -> R,
    ) -> R {
        let previous = self.activate(path);
        let result = f(self);
        self.active_env = previous;
        result
    }

    /// Directory of the shared environment `name` in the primary depot.
    pub fn shared_env_dir(&self, name: &str) -> PathBuf {
        self.primary_depot().join("environments").join(name)
    }

    /// Stamp the environment's manifest in the primary depot's usage ledger.
    /// Usage logging is advisory; failures only warn.
    pub fn log_manifest_usage(&self, env: &EnvCache) {
        if let Err(err) = usage::append(
            self.primary_depot(),
            UsageKind::Manifest,
            &env.manifest_file,
            None,
        ) {
            warn!(%err, "could not record manifest usage");
        }
    }

    /// Stamp an artifact index file in the usage ledger.
    pub fn log_artifact_usage(&self, index_file: &Path) {
        if let Err(err) = usage::append(
            self.primary_depot(),
            UsageKind::Artifact,
            index_file,
            None,
        ) {
            warn!(%err, "could not record artifact usage");
        }
    }

    /// Create (if needed) and stamp the scratch space for `(uuid, name)`,
    /// recording the active project as a parent.
    pub fn scratch_space(
        &self,
        uuid: &Uuid,
        name: &str,
        parent_project: &Path,
    ) -> std::io::Result<PathBuf> {
        let dir = paths::scratch_dir(self.primary_depot(), uuid, name);
        std::fs::create_dir_all(&dir)?;
        if let Err(err) = usage::append(
            self.primary_depot(),
            UsageKind::Scratch,
            &dir,
            Some(parent_project),
        ) {
            warn!(%err, "could not record scratch usage");
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_runtime(depot: PathBuf, env: PathBuf) -> Runtime {
        Runtime::new(
            Config {
                depots: vec![depot],
                precompile_auto: false,
                num_precompile_tasks: 2,
            },
            env,
        )
    }

    #[test]
    fn with_activated_restores_previous_env() {
        let dir = tempdir().unwrap();
        let mut runtime = test_runtime(dir.path().into(), PathBuf::from("/env/a"));

        let seen = runtime.with_activated(PathBuf::from("/env/b"), |rt| {
            rt.active_env().to_path_buf()
        });
        assert_eq!(seen, PathBuf::from("/env/b"));
        assert_eq!(runtime.active_env(), Path::new("/env/a"));
    }

    #[test]
    fn scratch_space_records_parent_project() {
        let depot = tempdir().unwrap();
        let runtime = test_runtime(depot.path().into(), PathBuf::from("/env"));

        let uuid = Uuid::new_v4();
        let parent = Path::new("/env/Project.toml");
        let dir = runtime.scratch_space(&uuid, "cache", parent).unwrap();
        assert!(dir.is_dir());

        let table = usage::read(depot.path(), UsageKind::Scratch);
        assert!(table[&dir].parents.contains(parent));
    }
}
