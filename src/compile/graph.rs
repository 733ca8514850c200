//! Dependency graph construction and cycle detection.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::env::EnvCache;
use crate::external::Compiler;
use crate::types::PackageId;

/// Flat adjacency over stable package ids.
pub type DepsMap = BTreeMap<PackageId, Vec<PackageId>>;

/// Build the precompile graph from the manifest, excluding packages the
/// system image already provides, augmented with the project itself when it
/// has a source file.
pub fn build_depsmap(env: &EnvCache, compiler: &dyn Compiler) -> DepsMap {
    let mut map = DepsMap::new();

    for (uuid, entry) in &env.manifest.packages {
        let id = PackageId::new(entry.name.clone(), *uuid);
        if compiler.in_sysimage(&id) {
            continue;
        }
        let deps = entry
            .deps
            .values()
            .filter_map(|dep_uuid| env.manifest.package_id(*dep_uuid))
            .filter(|dep| !compiler.in_sysimage(dep))
            .collect();
        map.insert(id, deps);
    }

    if let (Some(name), Some(uuid)) = (&env.project.name, env.project.uuid) {
        if env.project.source_file(&env.project_file).is_some() {
            let id = PackageId::new(name.clone(), uuid);
            let deps = env
                .project
                .deps
                .values()
                .filter_map(|dep_uuid| env.manifest.package_id(*dep_uuid))
                .filter(|dep| map.contains_key(dep))
                .collect();
            map.insert(id, deps);
        }
    }

    map
}

/// All packages reachable from themselves, found with an iterative strongly
/// connected components pass (no recursion, so pathological graphs cannot
/// blow the stack).
pub fn circular_nodes(deps: &DepsMap) -> BTreeSet<PackageId> {
    let nodes: Vec<&PackageId> = deps.keys().collect();
    let index_of: HashMap<&PackageId, usize> =
        nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|id| {
            deps[*id]
                .iter()
                .filter_map(|dep| index_of.get(dep).copied())
                .collect()
        })
        .collect();

    let n = nodes.len();
    const UNVISITED: usize = usize::MAX;
    let mut order = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_order = 0usize;
    let mut circular = BTreeSet::new();

    for start in 0..n {
        if order[start] != UNVISITED {
            continue;
        }
        // Explicit DFS frames: (node, next child offset).
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(&(v, child)) = frames.last() {
            if child == 0 {
                order[v] = next_order;
                low[v] = next_order;
                next_order += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if child < adjacency[v].len() {
                frames.last_mut().expect("frame exists").1 += 1;
                let w = adjacency[v][child];
                if order[w] == UNVISITED {
                    frames.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(order[w]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == order[v] {
                    let mut component = Vec::new();
                    loop {
                        let w = stack.pop().expect("scc stack underflow");
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    let self_loop = adjacency[v].contains(&v);
                    if component.len() > 1 || self_loop {
                        circular.extend(component.into_iter().map(|w| nodes[w].clone()));
                    }
                }
            }
        }
    }

    circular
}
