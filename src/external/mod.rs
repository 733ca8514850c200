//! Interfaces to external collaborators.
//!
//! Version solving, registry access, git plumbing, artifact download, build
//! running and the compile routine all live behind traits so the core can be
//! driven against fakes in tests and against different back ends in the CLI.

pub mod defaults;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use semver::Version;
use uuid::Uuid;

use crate::types::{Manifest, Mode, PackageId, PackageSpec, PreserveLevel, Project, UpgradeLevel};

/// One package in a solver answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub id: PackageId,
    pub version: Option<Version>,
    pub tree_hash: Option<String>,
    pub deps: BTreeMap<String, Uuid>,
}

/// Everything a solver needs to produce a new resolution.
pub struct SolveRequest<'a> {
    pub project: &'a Project,
    pub manifest: &'a Manifest,
    /// Specs being added or upgraded. Empty for a plain re-resolve.
    pub specs: &'a [PackageSpec],
    pub preserve: PreserveLevel,
    pub level: UpgradeLevel,
    /// Whether upgrades are scoped to direct project dependencies or the
    /// whole manifest.
    pub mode: Mode,
}

/// Version-range solver. The answer must cover every project dependency and
/// be transitively closed.
pub trait Resolver: Send + Sync {
    fn solve(&self, request: SolveRequest<'_>) -> anyhow::Result<Vec<ResolvedPackage>>;
}

/// Registry metadata access.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch remote registry metadata. `force` bypasses any freshness check.
    async fn refresh(&self, force: bool) -> anyhow::Result<()>;

    /// Uuid registered for `name`, if any.
    fn find_uuid(&self, name: &str) -> anyhow::Result<Option<Uuid>>;
}

/// Git plumbing for repo-tracked packages.
#[async_trait]
pub trait GitSource: Send + Sync {
    /// Clone `source` as a bare mirror at `dest`, or fetch if it exists.
    async fn ensure_clone(&self, source: &str, dest: &Path) -> anyhow::Result<()>;

    /// Resolve `rev` (or the default branch) to a git tree hash.
    async fn tree_hash(&self, clone: &Path, rev: Option<&str>) -> anyhow::Result<String>;

    /// Materialise `tree_hash` from `clone` into `dest`.
    async fn checkout_tree(&self, clone: &Path, tree_hash: &str, dest: &Path)
        -> anyhow::Result<()>;
}

/// Source and artifact download into the depot.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Ensure the package source tree is present at `dest`. Returns `true` if
    /// anything was downloaded.
    async fn ensure_package(
        &self,
        id: &PackageId,
        tree_hash: &str,
        dest: &Path,
    ) -> anyhow::Result<bool>;

    /// Ensure the artifact keyed by `tree_hash` is present at `dest`.
    async fn ensure_artifact(
        &self,
        tree_hash: &str,
        platform: Option<&str>,
        dest: &Path,
    ) -> anyhow::Result<bool>;
}

/// Options forwarded to the test runner.
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    pub coverage: bool,
    pub julia_args: Vec<String>,
    pub test_args: Vec<String>,
}

/// Runs package build scripts and test suites.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn build(&self, project_file: &Path, pkg: &PackageId) -> anyhow::Result<()>;

    async fn test(
        &self,
        project_file: &Path,
        pkg: &PackageId,
        options: &TestOptions,
    ) -> anyhow::Result<()>;
}

/// Result of one external compile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Compiled,
    /// Not cacheable in this session; may succeed after a restart.
    PrecompilableLater(String),
    /// Generic failure with captured output.
    Failed(String),
}

/// The external compile routine and its staleness oracle.
///
/// `compile` is an opaque blocking call from the scheduler's point of view;
/// once started it runs to completion even under cancellation.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Runtime version string; part of the suspension-file key.
    fn runtime_version(&self) -> String;

    /// Packages baked into the system image never precompile.
    fn in_sysimage(&self, id: &PackageId) -> bool;

    /// Whether the cached artefact for `id` (compiled from `source_path`) is
    /// stale and needs a rebuild.
    fn is_stale(&self, id: &PackageId, source_path: Option<&PathBuf>) -> bool;

    async fn compile(&self, id: &PackageId, project_file: &Path) -> CompileOutcome;
}
