//! Materialise an environment from its manifest.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::{auto_precompile, commit, load_env, Context, OpError};
use crate::paths;
use crate::types::PackageId;

#[derive(Debug, Clone, Default)]
pub struct InstantiateOptions {
    pub platform: Option<String>,
    pub update_registry: bool,
    pub verbose: bool,
}

/// Bring every package and artifact the manifest names onto disk: synthesise
/// a project if needed, check out repo-tracked packages, download sources and
/// artifacts, run build scripts, and precompile.
pub async fn instantiate(
    ctx: &mut Context,
    options: &InstantiateOptions,
) -> Result<(), OpError> {
    let mut env = load_env(ctx)?;

    // A manifest without a project: synthesise one from the manifest's
    // top-level names.
    if !env.project_file.is_file() && !env.manifest.packages.is_empty() {
        let mut deps = BTreeMap::new();
        for (uuid, entry) in &env.manifest.packages {
            if deps.insert(entry.name.clone(), *uuid).is_some() {
                return Err(OpError::Other(format!(
                    "cannot synthesise a project: duplicate name {} in manifest",
                    entry.name
                )));
            }
        }
        env.project.deps = deps;
    }

    // Every project dependency must resolve into the manifest.
    for (name, uuid) in &env.project.deps {
        if env.manifest.get(*uuid).is_none() {
            return Err(OpError::Other(format!(
                "expected {name} to be in the manifest; run resolve first"
            )));
        }
    }
    env.manifest.assert_closed().map_err(crate::env::EnvError::from)?;

    if options.update_registry {
        // One forced retry on registry failure before giving up.
        if let Err(err) = ctx.registry.refresh(false).await {
            warn!(%err, "registry refresh failed, retrying with force");
            ctx.registry.refresh(true).await.map_err(OpError::Registry)?;
        }
    }

    let depot = ctx.runtime.primary_depot().to_path_buf();

    // Repo-tracked packages: mirror, locate the tree, check out. A failing
    // repo aborts the instantiate, but only after the rest were attempted.
    let mut git_failures: Vec<String> = Vec::new();
    for entry in env.manifest.packages.values() {
        let Some(repo) = &entry.repo else { continue };
        let Some(tree_hash) = &entry.tree_hash else {
            git_failures.push(format!("{}: repo-tracked but has no tree hash", entry.name));
            continue;
        };
        let dest = paths::package_dir(&depot, &entry.name, tree_hash);
        if dest.is_dir() {
            continue;
        }
        let result = checkout_repo_entry(ctx, &repo.source, tree_hash, &dest).await;
        if let Err(err) = result {
            warn!(package = %entry.name, %err, "repo checkout failed");
            git_failures.push(format!("{}: {err:#}", entry.name));
        } else if options.verbose {
            ctx.reporter.item(&format!("checked out {}", entry.name));
        }
    }

    // Registry-tracked sources and their artifacts.
    for (uuid, entry) in &env.manifest.packages {
        let Some(tree_hash) = &entry.tree_hash else {
            continue;
        };
        if entry.path.is_some() || entry.repo.is_some() {
            continue;
        }
        let id = PackageId::new(entry.name.clone(), *uuid);
        let dest = paths::package_dir(&depot, &entry.name, tree_hash);
        let fetched = ctx
            .downloader
            .ensure_package(&id, tree_hash, &dest)
            .await
            .map_err(OpError::Download)?;
        if fetched && options.verbose {
            ctx.reporter.item(&format!("downloaded {}", entry.name));
        }
        super::download_artifacts(ctx, &dest, options.platform.as_deref()).await?;
    }

    if !git_failures.is_empty() {
        return Err(OpError::Git(anyhow::anyhow!(git_failures.join("; "))));
    }

    // Build scripts for packages that carry one.
    for (uuid, entry) in &env.manifest.packages {
        let Some(tree_hash) = &entry.tree_hash else {
            continue;
        };
        let pkg_dir = paths::package_dir(&depot, &entry.name, tree_hash);
        if !pkg_dir.join("deps").join("build.jl").is_file() {
            continue;
        }
        let id = PackageId::new(entry.name.clone(), *uuid);
        ctx.builder
            .build(&env.project_file, &id)
            .await
            .map_err(OpError::Build)?;
    }

    commit(ctx, &mut env)?;
    auto_precompile(ctx, &env).await
}

async fn checkout_repo_entry(
    ctx: &Context,
    source: &str,
    tree_hash: &str,
    dest: &Path,
) -> anyhow::Result<()> {
    let depot = ctx.runtime.primary_depot();
    let clone = paths::clone_dir(depot, source);
    ctx.git.ensure_clone(source, &clone).await?;
    ctx.git.checkout_tree(&clone, tree_hash, dest).await
}

/// Artifact tree hashes referenced from an Artifacts.toml, optionally
/// narrowed to one platform triplet.
pub(super) fn artifact_hashes(index_file: &Path, platform: Option<&str>) -> Vec<String> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Single(Meta),
        Platforms(Vec<Meta>),
    }
    #[derive(Deserialize)]
    struct Meta {
        #[serde(rename = "git-tree-sha1")]
        tree_sha1: String,
        triplet: Option<String>,
    }

    let Ok(content) = std::fs::read_to_string(index_file) else {
        return Vec::new();
    };
    let Ok(index) = toml::from_str::<BTreeMap<String, Entry>>(&content) else {
        warn!(file = %index_file.display(), "malformed artifact index, skipping");
        return Vec::new();
    };

    let mut hashes = Vec::new();
    for entry in index.values() {
        match entry {
            Entry::Single(meta) => hashes.push(meta.tree_sha1.clone()),
            Entry::Platforms(metas) => {
                for meta in metas {
                    let wanted = match (platform, &meta.triplet) {
                        (Some(platform), Some(triplet)) => platform == triplet,
                        _ => true,
                    };
                    if wanted {
                        hashes.push(meta.tree_sha1.clone());
                    }
                }
            }
        }
    }
    hashes
}
