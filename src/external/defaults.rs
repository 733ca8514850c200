//! Default collaborator implementations used by the CLI.
//!
//! These are deliberately small: a fixed-version resolver, an offline
//! registry, git via the system binary, HTTP download via reqwest, and a
//! compiler that spawns the runtime.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use super::{
    BuildRunner, CompileOutcome, Compiler, Downloader, GitSource, Registry, ResolvedPackage,
    Resolver, SolveRequest, TestOptions,
};
use crate::types::{PackageId, Tracking};

/// Keeps every manifest entry at its current version and materialises new
/// specs at their requested exact version. No registry graph is consulted, so
/// a spec without an exact version cannot be solved offline.
#[derive(Debug, Clone, Default)]
pub struct FixedResolver;

impl Resolver for FixedResolver {
    fn solve(&self, request: SolveRequest<'_>) -> anyhow::Result<Vec<ResolvedPackage>> {
        let mut out: Vec<ResolvedPackage> = request
            .manifest
            .packages
            .iter()
            .map(|(uuid, entry)| ResolvedPackage {
                id: PackageId::new(entry.name.clone(), *uuid),
                version: entry.version.clone(),
                tree_hash: entry.tree_hash.clone(),
                deps: entry.deps.clone(),
            })
            .collect();

        for spec in request.specs {
            let (name, uuid) = match (&spec.name, spec.uuid) {
                (Some(n), Some(u)) => (n.clone(), u),
                _ => bail!("offline resolve needs fully identified specs"),
            };
            if out.iter().any(|r| r.id.uuid == uuid) {
                continue;
            }
            let version = match &spec.tracking {
                Tracking::Registry => Some(
                    spec.version
                        .as_exact()
                        .cloned()
                        .ok_or_else(|| anyhow!("no registry available to solve a version range for {name}; give an exact version"))?,
                ),
                _ => spec.version.as_exact().cloned(),
            };
            out.push(ResolvedPackage {
                id: PackageId::new(name, uuid),
                version,
                tree_hash: spec.tree_hash.clone(),
                deps: Default::default(),
            });
        }
        Ok(out)
    }
}

/// No registry: refresh is a no-op and every lookup misses.
#[derive(Debug, Clone, Default)]
pub struct OfflineRegistry;

#[async_trait]
impl Registry for OfflineRegistry {
    async fn refresh(&self, _force: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn find_uuid(&self, _name: &str) -> anyhow::Result<Option<Uuid>> {
        Ok(None)
    }
}

/// Git plumbing through the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct CliGit;

impl CliGit {
    async fn run(args: &[&str], cwd: Option<&Path>) -> anyhow::Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).stdin(Stdio::null());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await.context("failed to spawn git")?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitSource for CliGit {
    async fn ensure_clone(&self, source: &str, dest: &Path) -> anyhow::Result<()> {
        if dest.join("HEAD").is_file() {
            Self::run(&["fetch", "--prune", "origin"], Some(dest)).await?;
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dest_str = dest
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF-8 clone path"))?;
        Self::run(&["clone", "--mirror", source, dest_str], None).await?;
        Ok(())
    }

    async fn tree_hash(&self, clone: &Path, rev: Option<&str>) -> anyhow::Result<String> {
        let spec = format!("{}^{{tree}}", rev.unwrap_or("HEAD"));
        Self::run(&["rev-parse", &spec], Some(clone)).await
    }

    async fn checkout_tree(
        &self,
        clone: &Path,
        tree_hash: &str,
        dest: &Path,
    ) -> anyhow::Result<()> {
        std::fs::create_dir_all(dest)?;
        let dest_str = dest
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF-8 checkout path"))?;
        let worktree = format!("--work-tree={dest_str}");
        Self::run(
            &[worktree.as_str(), "checkout", tree_hash, "--", "."],
            Some(clone),
        )
        .await?;
        Ok(())
    }
}

/// Package and artifact download from a package server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    server: String,
}

impl HttpDownloader {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server: server.into(),
        }
    }

    async fn fetch_tarball(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        let dir = dest
            .parent()
            .ok_or_else(|| anyhow!("destination has no parent"))?;
        std::fs::create_dir_all(dir)?;
        let tarball = tempfile::Builder::new().suffix(".tar.gz").tempfile_in(dir)?;
        std::fs::write(tarball.path(), &bytes)?;

        std::fs::create_dir_all(dest)?;
        let status = Command::new("tar")
            .arg("-xzf")
            .arg(tarball.path())
            .arg("-C")
            .arg(dest)
            .status()
            .await
            .context("failed to spawn tar")?;
        if !status.success() {
            bail!("tar extraction failed for {url}");
        }
        Ok(())
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new("https://pkg.julialang.org")
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn ensure_package(
        &self,
        id: &PackageId,
        tree_hash: &str,
        dest: &Path,
    ) -> anyhow::Result<bool> {
        if dest.is_dir() {
            return Ok(false);
        }
        let url = format!("{}/package/{}/{tree_hash}", self.server, id.uuid);
        self.fetch_tarball(&url, dest)
            .await
            .with_context(|| format!("downloading {id}"))?;
        Ok(true)
    }

    async fn ensure_artifact(
        &self,
        tree_hash: &str,
        _platform: Option<&str>,
        dest: &Path,
    ) -> anyhow::Result<bool> {
        if dest.is_dir() {
            return Ok(false);
        }
        let url = format!("{}/artifact/{tree_hash}", self.server);
        self.fetch_tarball(&url, dest)
            .await
            .with_context(|| format!("downloading artifact {tree_hash}"))?;
        Ok(true)
    }
}

/// Build and test through a runtime subprocess.
#[derive(Debug, Clone, Default)]
pub struct ShellBuildRunner;

#[async_trait]
impl BuildRunner for ShellBuildRunner {
    async fn build(&self, project_file: &Path, pkg: &PackageId) -> anyhow::Result<()> {
        let code = format!("import Pkg; Pkg.build(\"{}\")", pkg.name);
        run_julia(project_file, &code, &[]).await
    }

    async fn test(
        &self,
        project_file: &Path,
        pkg: &PackageId,
        options: &TestOptions,
    ) -> anyhow::Result<()> {
        let coverage = if options.coverage { "true" } else { "false" };
        let code = format!(
            "import Pkg; Pkg.test(\"{}\"; coverage={coverage}, test_args={:?})",
            pkg.name, options.test_args
        );
        run_julia(project_file, &code, &options.julia_args).await
    }
}

async fn run_julia(project_file: &Path, code: &str, extra_args: &[String]) -> anyhow::Result<()> {
    let status = Command::new("julia")
        .arg(format!("--project={}", project_file.display()))
        .args(extra_args)
        .arg("-e")
        .arg(code)
        .status()
        .await
        .context("failed to spawn julia")?;
    if !status.success() {
        bail!("julia exited with {status}");
    }
    Ok(())
}

/// Compiles packages by spawning the runtime, one subprocess per package.
#[derive(Debug, Clone)]
pub struct JuliaCompiler {
    version: String,
    /// Root of the compile cache (`<depot>/compiled/v<major.minor>`), when
    /// staleness can be judged locally.
    compiled_dir: Option<PathBuf>,
}

impl JuliaCompiler {
    pub fn new(version: impl Into<String>, compiled_dir: Option<PathBuf>) -> Self {
        Self {
            version: version.into(),
            compiled_dir,
        }
    }
}

impl Default for JuliaCompiler {
    fn default() -> Self {
        Self::new("1.11.0", None)
    }
}

fn newest_mtime(dir: &Path) -> Option<std::time::SystemTime> {
    let mut newest = None;
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let mtime = if path.is_dir() {
            newest_mtime(&path)
        } else {
            entry.metadata().ok().and_then(|m| m.modified().ok())
        };
        if let Some(t) = mtime {
            if newest.map_or(true, |n| t > n) {
                newest = Some(t);
            }
        }
    }
    newest
}

#[async_trait]
impl Compiler for JuliaCompiler {
    fn runtime_version(&self) -> String {
        self.version.clone()
    }

    fn in_sysimage(&self, id: &PackageId) -> bool {
        // Standard library names ship in the system image.
        const SYSIMAGE: &[&str] = &[
            "Base64", "Dates", "Logging", "Markdown", "Printf", "Random", "SHA", "Serialization",
            "Sockets", "TOML", "UUIDs", "Unicode",
        ];
        SYSIMAGE.contains(&id.name.as_str())
    }

    fn is_stale(&self, id: &PackageId, source_path: Option<&PathBuf>) -> bool {
        let (Some(source), Some(compiled)) = (source_path, &self.compiled_dir) else {
            return true;
        };
        let cache = compiled.join(&id.name);
        match (newest_mtime(&cache), newest_mtime(source)) {
            (Some(cache_time), Some(source_time)) => source_time > cache_time,
            // No cache yet, or nothing to compile from.
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    async fn compile(&self, id: &PackageId, project_file: &Path) -> CompileOutcome {
        let code = format!(
            "import Pkg; Pkg.precompile(\"{}\"; already_instantiated=true)",
            id.name
        );
        let output = Command::new("julia")
            .arg(format!("--project={}", project_file.display()))
            .arg("--startup-file=no")
            .arg("-e")
            .arg(code)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => CompileOutcome::Compiled,
            Ok(out) => CompileOutcome::Failed(String::from_utf8_lossy(&out.stderr).into_owned()),
            Err(err) => CompileOutcome::Failed(format!("failed to spawn julia: {err}")),
        }
    }
}
