//! depot - Package and artifact lifecycle manager for Julia depots
//!
//! Maintains per-environment manifests of resolved dependencies, materialises
//! package sources and platform-keyed artifacts into content-addressed depots,
//! reclaims unreachable depot content with grace-period garbage collection,
//! and drives parallel precompilation of a dependency graph.

pub mod compile;
pub mod env;
pub mod external;
pub mod gc;
pub mod ops;
pub mod paths;
pub mod runtime;
pub mod types;
pub mod ui;

use std::path::PathBuf;

use dirs::home_dir;

/// Default primary depot: ~/.julia
pub fn default_depot() -> PathBuf {
    home_dir()
        .expect("Could not determine home directory")
        .join(".julia")
}

/// The depot stack, from `JULIA_DEPOT_PATH` (platform path-separated) or the
/// default depot. An empty entry in the variable expands to the default, as
/// the runtime does it.
pub fn depot_paths() -> Vec<PathBuf> {
    match std::env::var_os("JULIA_DEPOT_PATH") {
        Some(raw) => {
            let mut depots = Vec::new();
            for entry in std::env::split_paths(&raw) {
                if entry.as_os_str().is_empty() {
                    depots.push(default_depot());
                } else {
                    depots.push(entry);
                }
            }
            if depots.is_empty() {
                depots.push(default_depot());
            }
            depots
        }
        None => vec![default_depot()],
    }
}

/// UUID under which the tool keeps its own scratch state (precompile
/// suspensions and the like).
pub const TOOL_UUID: &str = "2c9cbc56-c1a1-48c8-9c3a-0c5b6a0d3a7e";
