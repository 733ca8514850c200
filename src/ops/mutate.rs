//! Mutating operations: add, develop, rm, up, pin, free, resolve.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use uuid::Uuid;

use super::validate::{validate, Op};
use super::{apply_resolution, auto_precompile, commit, download_sources, load_env};
use super::{Context, OpError};
use crate::env::EnvCache;
use crate::external::SolveRequest;
use crate::paths;
use crate::types::{Mode, PackageSpec, PreserveLevel, Project, Tracking, UpgradeLevel};

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub preserve: PreserveLevel,
    pub platform: Option<String>,
    pub update_registry: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RmOptions {
    pub mode: Mode,
}

#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    pub level: UpgradeLevel,
    pub mode: Mode,
    pub update_registry: bool,
}

/// Add packages to the project and re-resolve the manifest.
pub async fn add(
    ctx: &mut Context,
    specs: &[PackageSpec],
    options: &AddOptions,
) -> Result<(), OpError> {
    let mut env = load_env(ctx)?;
    let mut specs = validate(Op::Add, specs, &env.project)?;
    if options.update_registry {
        ctx.registry.refresh(false).await.map_err(OpError::Registry)?;
    }

    resolve_repo_specs(ctx, &mut specs).await?;
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    registry_fill_uuids(ctx, &mut specs)?;
    env.ensure_resolved(&specs)?;

    solve_and_apply(ctx, &mut env, &specs, options.preserve, UpgradeLevel::Major, Mode::Project)?;
    add_direct_deps(&mut env, &specs);
    env.manifest.prune(env.project.deps.values().copied());

    download_sources(ctx, &env, options.platform.as_deref()).await?;
    commit(ctx, &mut env)?;
    auto_precompile(ctx, &env).await
}

/// Track packages from a local checkout (or clone a repo into the dev dir
/// first and track that).
pub async fn develop(
    ctx: &mut Context,
    specs: &[PackageSpec],
    options: &AddOptions,
) -> Result<(), OpError> {
    let mut env = load_env(ctx)?;
    let mut specs = validate(Op::Develop, specs, &env.project)?;
    if options.update_registry {
        ctx.registry.refresh(false).await.map_err(OpError::Registry)?;
    }

    // Repo-tracked develops materialise into the dev dir and become
    // path-tracked from there.
    for spec in &mut specs {
        if let Tracking::Repo { source, subdir, .. } = spec.tracking.clone() {
            let checkout = clone_into_dev_dir(ctx, &source).await?;
            let tracked = match &subdir {
                Some(subdir) => checkout.join(subdir),
                None => checkout,
            };
            spec.tracking = Tracking::Path(tracked);
        }
    }
    resolve_path_specs(&mut specs)?;
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    env.ensure_resolved(&specs)?;

    solve_and_apply(ctx, &mut env, &specs, options.preserve, UpgradeLevel::Major, Mode::Project)?;
    add_direct_deps(&mut env, &specs);
    env.manifest.prune(env.project.deps.values().copied());

    download_sources(ctx, &env, options.platform.as_deref()).await?;
    commit(ctx, &mut env)?;
    auto_precompile(ctx, &env).await
}

/// Remove packages from the project (and anything the removal strands) or,
/// in manifest mode, from the manifest together with everything that depends
/// on them.
pub async fn rm(
    ctx: &mut Context,
    specs: &[PackageSpec],
    options: &RmOptions,
) -> Result<(), OpError> {
    let mut env = load_env(ctx)?;
    let mut specs = validate(Op::Rm, specs, &env.project)?;
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    env.ensure_resolved(&specs)?;

    match options.mode {
        Mode::Project => {
            for spec in &specs {
                let uuid = spec.uuid.expect("ensured above");
                let name = env
                    .project
                    .deps
                    .iter()
                    .find(|(_, u)| **u == uuid)
                    .map(|(n, _)| n.clone())
                    .ok_or_else(|| OpError::NotFound(spec.display_name()))?;
                env.project.deps.remove(&name);
            }
        }
        Mode::Manifest => {
            for spec in &specs {
                let uuid = env.require_entry(spec)?;
                let dependents: Vec<Uuid> = env
                    .manifest
                    .packages
                    .keys()
                    .copied()
                    .filter(|candidate| {
                        env.manifest.reachable_from([*candidate]).contains(&uuid)
                    })
                    .collect();
                for doomed in dependents {
                    env.manifest.packages.remove(&doomed);
                    env.project.deps.retain(|_, u| *u != doomed);
                }
            }
        }
    }
    env.manifest.prune(env.project.deps.values().copied());

    commit(ctx, &mut env)?;
    auto_precompile(ctx, &env).await
}

/// Upgrade packages within `level`, or the whole environment when no specs
/// are given.
pub async fn up(
    ctx: &mut Context,
    specs: &[PackageSpec],
    options: &UpOptions,
) -> Result<(), OpError> {
    let mut env = load_env(ctx)?;
    let mut specs = validate(Op::Up, specs, &env.project)?;
    if options.update_registry {
        ctx.registry.refresh(false).await.map_err(OpError::Registry)?;
    }
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    env.ensure_resolved(&specs)?;

    solve_and_apply(ctx, &mut env, &specs, PreserveLevel::None, options.level, options.mode)?;
    env.manifest.prune(env.project.deps.values().copied());

    download_sources(ctx, &env, None).await?;
    commit(ctx, &mut env)?;
    auto_precompile(ctx, &env).await
}

/// `resolve` is `up` at level fixed, manifest scope, no registry refresh.
pub async fn resolve(ctx: &mut Context) -> Result<(), OpError> {
    up(
        ctx,
        &[],
        &UpOptions {
            level: UpgradeLevel::Fixed,
            mode: Mode::Manifest,
            update_registry: false,
        },
    )
    .await
}

/// Pin packages to their current (or a given exact) version.
pub async fn pin(ctx: &mut Context, specs: &[PackageSpec]) -> Result<(), OpError> {
    let mut env = load_env(ctx)?;
    let mut specs = validate(Op::Pin, specs, &env.project)?;
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    env.ensure_resolved(&specs)?;

    for spec in &specs {
        let uuid = env.require_entry(spec)?;
        let entry = env.manifest.packages.get_mut(&uuid).expect("entry exists");
        if entry.path.is_some() {
            return Err(OpError::Other(format!(
                "cannot pin {}: it is tracking a path",
                entry.name
            )));
        }
        entry.pinned = true;
        if let Some(exact) = spec.version.as_exact() {
            if entry.version.as_ref() != Some(exact) {
                entry.version = Some(exact.clone());
                entry.tree_hash = None;
            }
        }
    }

    download_sources(ctx, &env, None).await?;
    commit(ctx, &mut env)?;
    auto_precompile(ctx, &env).await
}

/// Undo a pin or stop tracking a path/repo, handing the package back to the
/// resolver.
pub async fn free(
    ctx: &mut Context,
    specs: &[PackageSpec],
    options: &RmOptions,
) -> Result<(), OpError> {
    let mut env = load_env(ctx)?;
    let mut specs = validate(Op::Free, specs, &env.project)?;
    env.resolve_project_deps(&mut specs)?;
    env.resolve_manifest(&mut specs)?;
    env.ensure_resolved(&specs)?;

    for spec in &specs {
        let uuid = env.require_entry(spec)?;
        if options.mode == Mode::Project && !env.project.deps.values().any(|u| *u == uuid) {
            return Err(OpError::NotFound(spec.display_name()));
        }
        let entry = env.manifest.packages.get_mut(&uuid).expect("entry exists");
        if !entry.pinned && entry.path.is_none() && entry.repo.is_none() {
            return Err(OpError::Other(format!(
                "unable to free {}: it is neither pinned nor tracked",
                entry.name
            )));
        }
        entry.pinned = false;
        entry.path = None;
        entry.repo = None;
    }

    download_sources(ctx, &env, None).await?;
    commit(ctx, &mut env)?;
    auto_precompile(ctx, &env).await
}

fn solve_and_apply(
    ctx: &Context,
    env: &mut EnvCache,
    specs: &[PackageSpec],
    preserve: PreserveLevel,
    level: UpgradeLevel,
    mode: Mode,
) -> Result<(), OpError> {
    let resolution = ctx
        .resolver
        .solve(SolveRequest {
            project: &env.project,
            manifest: &env.manifest,
            specs,
            preserve,
            level,
            mode,
        })
        .map_err(OpError::Resolve)?;
    apply_resolution(env, &resolution, specs);
    Ok(())
}

fn add_direct_deps(env: &mut EnvCache, specs: &[PackageSpec]) {
    for spec in specs {
        let Some(uuid) = spec.uuid else { continue };
        let name = spec
            .name
            .clone()
            .or_else(|| env.manifest.get(uuid).map(|e| e.name.clone()));
        if let Some(name) = name {
            env.project.deps.insert(name, uuid);
        }
    }
}

/// Fill uuids for registry-tracked specs the environment did not know.
fn registry_fill_uuids(ctx: &Context, specs: &mut [PackageSpec]) -> Result<(), OpError> {
    for spec in specs.iter_mut() {
        if spec.uuid.is_some() {
            continue;
        }
        if let Some(name) = &spec.name {
            spec.uuid = ctx.registry.find_uuid(name).map_err(OpError::Registry)?;
        }
    }
    Ok(())
}

/// For each repo-tracked spec: mirror the repo into `clones/`, resolve the
/// requested revision to a tree hash, materialise the tree under `packages/`
/// and lift name/uuid from its project file.
async fn resolve_repo_specs(ctx: &Context, specs: &mut [PackageSpec]) -> Result<(), OpError> {
    let depot = ctx.runtime.primary_depot().to_path_buf();
    for spec in specs.iter_mut() {
        let Tracking::Repo { source, rev, subdir } = spec.tracking.clone() else {
            continue;
        };

        let clone = paths::clone_dir(&depot, &source);
        ctx.git
            .ensure_clone(&source, &clone)
            .await
            .map_err(OpError::Git)?;
        let tree_hash = match &spec.tree_hash {
            Some(hash) => hash.clone(),
            None => ctx
                .git
                .tree_hash(&clone, rev.as_deref())
                .await
                .map_err(OpError::Git)?,
        };

        // Check out into a staging dir first; the final location needs the
        // package name from the checked-out project file.
        let staging = tempfile::tempdir_in(&depot)?;
        ctx.git
            .checkout_tree(&clone, &tree_hash, staging.path())
            .await
            .map_err(OpError::Git)?;
        let project_root = match &subdir {
            Some(subdir) => staging.path().join(subdir),
            None => staging.path().to_path_buf(),
        };
        let meta = read_package_project(&project_root)
            .with_context(|| format!("repository {source} has no usable project file"))
            .map_err(OpError::Git)?;

        let name = spec.name.clone().unwrap_or_else(|| meta.0.clone());
        let uuid = spec.uuid.unwrap_or(meta.1);
        let dest = paths::package_dir(&depot, &name, &tree_hash);
        if !dest.is_dir() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let staging = staging.into_path();
            std::fs::rename(&staging, &dest)?;
        }

        spec.name = Some(name);
        spec.uuid = Some(uuid);
        spec.tree_hash = Some(tree_hash);
    }
    Ok(())
}

/// Lift name/uuid/version from the project file of each path-tracked spec.
fn resolve_path_specs(specs: &mut [PackageSpec]) -> Result<(), OpError> {
    for spec in specs.iter_mut() {
        let Tracking::Path(path) = &spec.tracking else {
            continue;
        };
        let (name, uuid) = read_package_project(path)
            .map_err(|err| OpError::Other(format!("cannot develop {}: {err}", path.display())))?;
        spec.name.get_or_insert(name);
        spec.uuid.get_or_insert(uuid);
    }
    Ok(())
}

/// Name and uuid from a package checkout's Project.toml. A checkout without
/// a uuid gets a fresh one, as unregistered dev packages do.
fn read_package_project(root: &Path) -> anyhow::Result<(String, Uuid)> {
    let project_file = root.join("Project.toml");
    let content = std::fs::read_to_string(&project_file)
        .with_context(|| format!("no project file at {}", project_file.display()))?;
    let project: Project = toml::from_str(&content)?;
    let name = project
        .name
        .ok_or_else(|| anyhow::anyhow!("project file has no name"))?;
    Ok((name, project.uuid.unwrap_or_else(Uuid::new_v4)))
}

/// Clone (or fetch) a repo and check its default branch out into the dev
/// directory.
async fn clone_into_dev_dir(ctx: &Context, source: &str) -> Result<PathBuf, OpError> {
    let depot = ctx.runtime.primary_depot().to_path_buf();
    let clone = paths::clone_dir(&depot, source);
    ctx.git
        .ensure_clone(source, &clone)
        .await
        .map_err(OpError::Git)?;
    let tree_hash = ctx.git.tree_hash(&clone, None).await.map_err(OpError::Git)?;

    let stem = source
        .trim_end_matches(".git")
        .rsplit('/')
        .next()
        .unwrap_or("package");
    let dest = depot.join("dev").join(stem);
    if !dest.is_dir() {
        ctx.git
            .checkout_tree(&clone, &tree_hash, &dest)
            .await
            .map_err(OpError::Git)?;
    }
    Ok(dest)
}
