//! Operation dispatch.
//!
//! Every entry point follows the same skeleton: validate specs, resolve them
//! against the environment, mutate, write atomically, snapshot for undo, and
//! optionally auto-precompile.

pub mod context;
pub mod error;
mod instantiate;
mod mutate;
pub mod validate;

pub use context::Context;
pub use error::OpError;
pub use instantiate::{instantiate, InstantiateOptions};
pub use mutate::{add, develop, free, pin, resolve, rm, up, AddOptions, RmOptions, UpOptions};

use std::path::PathBuf;

use tokio::sync::watch;

use crate::compile::{self, CompileError, PrecompileOptions, PrecompileReport};
use crate::env::EnvCache;
use crate::external::{ResolvedPackage, TestOptions};
use crate::gc::{GcOptions, GcStats};
use crate::types::{Manifest, ManifestEntry, Mode, PackageSpec, RepoSource, Tracking};
use validate::{validate as validate_specs, Op};

#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivateOptions {
    pub shared: bool,
    pub temp: bool,
}

/// Load the active environment and stamp its manifest usage.
fn load_env(ctx: &Context) -> Result<EnvCache, OpError> {
    let env = EnvCache::load(ctx.runtime.active_env())?;
    ctx.runtime.log_manifest_usage(&env);
    Ok(env)
}

/// Persist the environment and record an undo snapshot (skipped when nothing
/// changed).
fn commit(ctx: &mut Context, env: &mut EnvCache) -> Result<(), OpError> {
    env.write()?;
    ctx.runtime.undo.snapshot(env);
    env.mark_clean();
    Ok(())
}

/// Replace the manifest with a solver answer, then overlay per-spec tracking
/// and pin state.
fn apply_resolution(env: &mut EnvCache, resolution: &[ResolvedPackage], specs: &[PackageSpec]) {
    let mut manifest = Manifest::default();
    for resolved in resolution {
        let mut entry = env
            .manifest
            .get(resolved.id.uuid)
            .cloned()
            .unwrap_or_else(|| ManifestEntry::new(resolved.id.name.clone()));
        entry.name = resolved.id.name.clone();
        entry.version = resolved.version.clone();
        if resolved.tree_hash.is_some() {
            entry.tree_hash = resolved.tree_hash.clone();
        }
        entry.deps = resolved.deps.clone();
        manifest.packages.insert(resolved.id.uuid, entry);
    }

    for spec in specs {
        let Some(uuid) = spec.uuid else { continue };
        let Some(entry) = manifest.packages.get_mut(&uuid) else {
            continue;
        };
        entry.pinned |= spec.pinned;
        if let Some(exact) = spec.version.as_exact() {
            entry.version = Some(exact.clone());
        }
        if let Some(hash) = &spec.tree_hash {
            entry.tree_hash = Some(hash.clone());
        }
        match &spec.tracking {
            Tracking::Registry => {}
            Tracking::Path(path) => {
                entry.path = Some(path.clone());
                entry.repo = None;
            }
            Tracking::Repo {
                source,
                rev,
                subdir,
            } => {
                entry.repo = Some(RepoSource {
                    source: source.clone(),
                    rev: rev.clone(),
                    subdir: subdir.clone(),
                });
                entry.path = None;
            }
        }
    }
    env.manifest = manifest;
}

/// Download package sources for every registry-tracked manifest entry, then
/// their artifacts.
async fn download_sources(
    ctx: &Context,
    env: &EnvCache,
    platform: Option<&str>,
) -> Result<(), OpError> {
    let depot = ctx.runtime.primary_depot().to_path_buf();
    for (uuid, entry) in &env.manifest.packages {
        let Some(tree_hash) = &entry.tree_hash else {
            continue;
        };
        if entry.path.is_some() {
            continue;
        }
        let id = crate::types::PackageId::new(entry.name.clone(), *uuid);
        let dest = crate::paths::package_dir(&depot, &entry.name, tree_hash);
        ctx.downloader
            .ensure_package(&id, tree_hash, &dest)
            .await
            .map_err(OpError::Download)?;
        download_artifacts(ctx, &dest, platform).await?;
    }
    Ok(())
}

/// Fetch artifacts referenced by a package's Artifacts.toml, if it has one.
async fn download_artifacts(
    ctx: &Context,
    package_dir: &std::path::Path,
    platform: Option<&str>,
) -> Result<(), OpError> {
    let index_file = package_dir.join("Artifacts.toml");
    if !index_file.is_file() {
        return Ok(());
    }
    ctx.runtime.log_artifact_usage(&index_file);
    let hashes = instantiate::artifact_hashes(&index_file, platform);
    let depot = ctx.runtime.primary_depot();
    for hash in hashes {
        let dest = crate::paths::artifact_dir(depot, &hash);
        ctx.downloader
            .ensure_artifact(&hash, platform, &dest)
            .await
            .map_err(OpError::Download)?;
    }
    Ok(())
}

/// Run the precompile scheduler after a mutation when
/// `JULIA_PKG_PRECOMPILE_AUTO` allows it. Failures surface as warnings here;
/// only explicit `precompile` calls turn them into errors.
async fn auto_precompile(ctx: &Context, env: &EnvCache) -> Result<(), OpError> {
    if !ctx.runtime.config.precompile_auto {
        return Ok(());
    }
    let (_cancel_tx, cancel_rx) = compile::cancellation();
    let options = PrecompileOptions::default();
    match compile::precompile(
        env,
        &ctx.runtime,
        ctx.compiler.as_ref(),
        ctx.reporter.as_ref(),
        &options,
        cancel_rx,
    )
    .await
    {
        Ok(_) => Ok(()),
        Err(CompileError::Failures(message)) => {
            ctx.reporter.warning(&message);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Explicit precompile: clears suspensions, then errors on any failure.
pub async fn precompile(
    ctx: &Context,
    verbose: bool,
) -> Result<PrecompileReport, OpError> {
    let (_cancel_tx, cancel_rx) = compile::cancellation();
    precompile_with_cancel(ctx, verbose, cancel_rx).await
}

/// Explicit precompile with an external cancellation latch.
pub async fn precompile_with_cancel(
    ctx: &Context,
    verbose: bool,
    cancel: watch::Receiver<bool>,
) -> Result<PrecompileReport, OpError> {
    let env = load_env(ctx)?;
    let options = PrecompileOptions {
        manual: true,
        verbose,
    };
    compile::precompile(
        &env,
        &ctx.runtime,
        ctx.compiler.as_ref(),
        ctx.reporter.as_ref(),
        &options,
        cancel,
    )
    .await
    .map_err(Into::into)
}

/// Sweep all configured depots.
pub fn gc(ctx: &Context, options: &GcOptions) -> Result<GcStats, OpError> {
    crate::gc::run(&ctx.runtime.config.depots, ctx.reporter.as_ref(), options).map_err(Into::into)
}

/// Print the environment's contents: direct dependencies in project mode,
/// every manifest entry in manifest mode.
pub fn status(ctx: &Context, options: &StatusOptions) -> Result<(), OpError> {
    let env = load_env(ctx)?;
    ctx.reporter
        .section(&format!("Status {}", env.project_file.display()));
    for (uuid, entry) in &env.manifest.packages {
        if options.mode == Mode::Project && !env.project.deps.values().any(|u| u == uuid) {
            continue;
        }
        let version = entry
            .version
            .as_ref()
            .map(|v| format!("v{v}"))
            .unwrap_or_default();
        let marker = if entry.pinned {
            " ⚲"
        } else if entry.path.is_some() {
            " (dev)"
        } else if entry.repo.is_some() {
            " (repo)"
        } else {
            ""
        };
        ctx.reporter
            .item(&format!("{} {version}{marker}", entry.name));
    }
    Ok(())
}

/// Step the environment one undo snapshot back and persist it, without
/// re-snapshotting.
pub fn undo(ctx: &mut Context) -> Result<(), OpError> {
    let mut env = EnvCache::load(ctx.runtime.active_env())?;
    ctx.runtime.undo.undo(&mut env)?;
    env.write()?;
    Ok(())
}

/// Inverse of [`undo`].
pub fn redo(ctx: &mut Context) -> Result<(), OpError> {
    let mut env = EnvCache::load(ctx.runtime.active_env())?;
    ctx.runtime.undo.redo(&mut env)?;
    env.write()?;
    Ok(())
}

/// Switch the active environment. Returns the newly active path.
pub fn activate(
    ctx: &mut Context,
    target: Option<&str>,
    options: &ActivateOptions,
) -> Result<PathBuf, OpError> {
    let dir = if options.temp {
        tempfile::Builder::new()
            .prefix("jl_")
            .tempdir()?
            .into_path()
    } else if options.shared {
        let name = target.ok_or_else(|| {
            OpError::Other("shared environments need a name".into())
        })?;
        ctx.runtime.shared_env_dir(name)
    } else {
        let target =
            target.ok_or_else(|| OpError::Other("activate needs a path".into()))?;
        PathBuf::from(target)
    };
    ctx.runtime.activate(dir.clone());
    Ok(dir)
}

/// Run a package's test suite.
pub async fn test(
    ctx: &Context,
    specs: &[PackageSpec],
    options: &TestOptions,
) -> Result<(), OpError> {
    let env = load_env(ctx)?;
    let mut specs = validate_specs(Op::Test, specs, &env.project)?;
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    env.ensure_resolved(&specs)?;
    for spec in &specs {
        let uuid = env.require_entry(spec)?;
        let id = env.manifest.package_id(uuid).expect("entry exists");
        ctx.builder
            .test(&env.project_file, &id, options)
            .await
            .map_err(OpError::Build)?;
    }
    Ok(())
}

/// Run build scripts for the given packages (or the whole manifest).
pub async fn build(ctx: &Context, specs: &[PackageSpec]) -> Result<(), OpError> {
    let env = load_env(ctx)?;
    let mut specs = validate_specs(Op::Build, specs, &env.project)?;
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    env.ensure_resolved(&specs)?;

    let targets: Vec<uuid::Uuid> = if specs.is_empty() {
        env.manifest.packages.keys().copied().collect()
    } else {
        specs.iter().filter_map(|s| s.uuid).collect()
    };
    for uuid in targets {
        let Some(id) = env.manifest.package_id(uuid) else {
            continue;
        };
        ctx.builder
            .build(&env.project_file, &id)
            .await
            .map_err(OpError::Build)?;
    }
    Ok(())
}
