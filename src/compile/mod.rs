//! Parallel precompilation of the dependency graph.
//!
//! A cooperative task per package: each waits for its dependencies' one-shot
//! latches, checks suspension and staleness, then compiles under a counting
//! semaphore. Cancellation is a broadcast latch every schedulable wait
//! observes; a compile call already running is left to finish.
//!
//! When a dependency fails, its dependents are still attempted (they usually
//! fail fast); they are not skipped.

pub mod graph;
pub mod suspend;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::debug;
use uuid::Uuid;

use crate::env::{EnvCache, EnvError};
use crate::external::{CompileOutcome, Compiler};
use crate::paths;
use crate::runtime::Runtime;
use crate::types::PackageId;
use crate::ui::Reporter;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("{0}")]
    Failures(String),
}

#[derive(Debug, Clone, Default)]
pub struct PrecompileOptions {
    /// Explicit user invocation: clears suspensions first and reports every
    /// failure, not just direct dependencies.
    pub manual: bool,
    pub verbose: bool,
}

/// Final tally of one scheduler run.
#[derive(Debug, Default)]
pub struct PrecompileReport {
    pub compiled: usize,
    pub already_fresh: usize,
    pub failed: BTreeMap<PackageId, Option<String>>,
    pub skipped: Vec<PackageId>,
    pub precompilable_later: Vec<PackageId>,
    pub circular: Vec<PackageId>,
    pub interrupted: bool,
}

/// A broadcast cancellation latch; send `true` to interrupt a running
/// scheduler.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Per-package scheduler state.
struct PkgState {
    started: AtomicBool,
    recompiled: AtomicBool,
    /// One-shot latch, notified exactly once at the package's terminal state.
    processed: watch::Sender<bool>,
}

impl PkgState {
    fn new() -> Self {
        let (processed, _) = watch::channel(false);
        Self {
            started: AtomicBool::new(false),
            recompiled: AtomicBool::new(false),
            processed,
        }
    }
}

/// Mutable scheduler state shared with progress consumers, all under one
/// lock.
#[derive(Default)]
struct View {
    pkg_queue: Vec<PackageId>,
    failed: BTreeMap<PackageId, Option<String>>,
    skipped: Vec<PackageId>,
    precompilable_later: Vec<PackageId>,
    circular: Vec<PackageId>,
    n_done: usize,
    n_already: usize,
    n_compiled: usize,
}

enum Outcome {
    Compiled,
    Fresh,
    Skipped,
    PrecompilableLater,
    Failed(String),
    Cancelled,
}

/// Precompile the environment's dependency graph.
pub async fn precompile(
    env: &EnvCache,
    runtime: &Runtime,
    compiler: &dyn Compiler,
    reporter: &dyn Reporter,
    options: &PrecompileOptions,
    cancel: watch::Receiver<bool>,
) -> Result<PrecompileReport, CompileError> {
    let depot = runtime.primary_depot().to_path_buf();
    let version = compiler.runtime_version();
    if options.manual {
        suspend::clear(&depot, &env.project_file, &version);
    }
    let mut initial_suspended = suspend::load(&depot, &env.project_file, &version);

    let depsmap = graph::build_depsmap(env, compiler);
    if depsmap.is_empty() {
        return Ok(PrecompileReport::default());
    }
    let circular = graph::circular_nodes(&depsmap);

    let states: HashMap<PackageId, Arc<PkgState>> = depsmap
        .keys()
        .map(|id| (id.clone(), Arc::new(PkgState::new())))
        .collect();

    let view = Mutex::new(View::default());

    // Break cycles before scheduling: circular packages are terminal from the
    // start so dependents never deadlock on their latches.
    for id in &circular {
        states[id].processed.send_replace(true);
        initial_suspended.insert(id.clone());
        view.lock().expect("view lock").circular.push(id.clone());
    }
    let suspended = Mutex::new(initial_suspended);

    let mut direct: HashSet<Uuid> = env.project.deps.values().copied().collect();
    direct.extend(env.project.uuid);

    let limiter = Semaphore::new(runtime.config.num_precompile_tasks.max(1));
    let (done_tx, _done_rx) = watch::channel(false);
    let total = depsmap.len() - circular.len();
    reporter.section("Precompiling");

    let tasks = depsmap
        .iter()
        .filter(|(id, _)| !circular.contains(*id))
        .map(|(id, deps)| {
            let source = source_path(env, runtime, id);
            let cancel = cancel.clone();
            let states = &states;
            let suspended = &suspended;
            let view = &view;
            let limiter = &limiter;
            let done_tx = &done_tx;
            let direct = &direct;
            async move {
                let outcome = run_one(
                    id, deps, states, suspended, limiter, &cancel, compiler, reporter, view,
                    &env.project_file, source, options.verbose,
                )
                .await;

                let mut v = view.lock().expect("view lock");
                match outcome {
                    Outcome::Compiled => v.n_compiled += 1,
                    Outcome::Fresh => v.n_already += 1,
                    Outcome::Skipped => v.skipped.push(id.clone()),
                    Outcome::PrecompilableLater => v.precompilable_later.push(id.clone()),
                    Outcome::Failed(output) => {
                        let keep_output = direct.contains(&id.uuid);
                        v.failed.insert(id.clone(), keep_output.then_some(output));
                    }
                    Outcome::Cancelled => {}
                }
                v.n_done += 1;
                let all_done = v.n_done == total;
                drop(v);

                states[id].processed.send_replace(true);
                if all_done {
                    done_tx.send_replace(true);
                }
            }
        });
    futures::future::join_all(tasks).await;

    let interrupted = *cancel.borrow();
    if interrupted {
        done_tx.send_replace(true);
    }

    suspend::save(
        &depot,
        &env.project_file,
        &version,
        &suspended.lock().expect("suspended lock"),
    )?;

    let view = view.into_inner().expect("view lock");
    let report = PrecompileReport {
        compiled: view.n_compiled,
        already_fresh: view.n_already,
        failed: view.failed,
        skipped: view.skipped,
        precompilable_later: view.precompilable_later,
        circular: view.circular,
        interrupted,
    };
    let started = states
        .values()
        .filter(|state| state.started.load(Ordering::Acquire))
        .count();
    debug!(
        started,
        compiled = report.compiled,
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        circular = report.circular.len(),
        "precompile finished"
    );

    if !report.precompilable_later.is_empty() {
        let names: Vec<String> = report
            .precompilable_later
            .iter()
            .map(ToString::to_string)
            .collect();
        reporter.warning(&format!(
            "{} may be precompilable after restarting the session",
            names.join(", ")
        ));
    }

    reporter.info(&format!(
        "{} dependencies precompiled ({} already fresh, {} skipped)",
        report.compiled,
        report.already_fresh,
        report.skipped.len()
    ));

    // Interrupted runs return without a final error.
    if report.interrupted {
        return Ok(report);
    }

    let reportable: Vec<(&PackageId, &Option<String>)> = report
        .failed
        .iter()
        .filter(|(id, _)| options.manual || direct.contains(&id.uuid))
        .collect();
    if !reportable.is_empty() {
        let mut message = format!("{} package(s) failed to precompile:", reportable.len());
        for (id, output) in reportable {
            message.push_str(&format!("\n  {id}"));
            if let Some(output) = output {
                for line in output.lines() {
                    message.push_str(&format!("\n    {line}"));
                }
            }
        }
        return Err(CompileError::Failures(message));
    }

    Ok(report)
}

/// Directory the compiler should judge staleness against.
fn source_path(env: &EnvCache, runtime: &Runtime, id: &PackageId) -> Option<PathBuf> {
    if env.project.uuid == Some(id.uuid) {
        return env
            .project
            .source_file(&env.project_file)
            .and_then(|src| src.parent().map(Path::to_path_buf));
    }
    let entry = env.manifest.get(id.uuid)?;
    if let Some(path) = &entry.path {
        let base = env.project_file.parent().unwrap_or_else(|| Path::new("."));
        return Some(base.join(path));
    }
    entry
        .tree_hash
        .as_ref()
        .map(|hash| paths::package_dir(runtime.primary_depot(), &id.name, hash))
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    id: &PackageId,
    deps: &[PackageId],
    states: &HashMap<PackageId, Arc<PkgState>>,
    suspended: &Mutex<BTreeSet<PackageId>>,
    limiter: &Semaphore,
    cancel: &watch::Receiver<bool>,
    compiler: &dyn Compiler,
    reporter: &dyn Reporter,
    view: &Mutex<View>,
    project_file: &Path,
    source: Option<PathBuf>,
    verbose: bool,
) -> Outcome {
    // Dependencies first: transitivity follows because each dependency itself
    // waits for its own dependencies before reaching a terminal state.
    for dep in deps {
        let Some(dep_state) = states.get(dep) else {
            continue;
        };
        let mut processed = dep_state.processed.subscribe();
        let mut cancel = cancel.clone();
        tokio::select! {
            _ = processed.wait_for(|done| *done) => {}
            _ = cancel.wait_for(|c| *c) => return Outcome::Cancelled,
        }
    }

    let dep_recompiled = deps
        .iter()
        .filter_map(|dep| states.get(dep))
        .any(|state| state.recompiled.load(Ordering::Acquire));

    // A previously-errored package is only retried once something below it
    // changed.
    if !dep_recompiled && suspended.lock().expect("suspended lock").contains(id) {
        return Outcome::Skipped;
    }

    if !dep_recompiled && !compiler.is_stale(id, source.as_ref()) {
        return Outcome::Fresh;
    }

    if *cancel.borrow() {
        return Outcome::Cancelled;
    }
    let permit = {
        let mut cancel = cancel.clone();
        tokio::select! {
            permit = limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Outcome::Cancelled,
            },
            _ = cancel.wait_for(|c| *c) => return Outcome::Cancelled,
        }
    };

    let state = &states[id];
    state.started.store(true, Ordering::Release);
    view.lock().expect("view lock").pkg_queue.push(id.clone());
    if verbose {
        reporter.item(&format!("precompiling {id}"));
    }

    // Opaque external call; runs to completion even under cancellation.
    let outcome = compiler.compile(id, project_file).await;

    view.lock()
        .expect("view lock")
        .pkg_queue
        .retain(|queued| queued != id);
    drop(permit);

    match outcome {
        CompileOutcome::Compiled => {
            state.recompiled.store(true, Ordering::Release);
            suspended.lock().expect("suspended lock").remove(id);
            Outcome::Compiled
        }
        CompileOutcome::PrecompilableLater(reason) => {
            debug!(%id, %reason, "not cacheable this session");
            Outcome::PrecompilableLater
        }
        CompileOutcome::Failed(output) => {
            suspended.lock().expect("suspended lock").insert(id.clone());
            Outcome::Failed(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Config;
    use crate::types::ManifestEntry;
    use crate::ui::SilentReporter;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FakeCompiler {
        failing: HashSet<String>,
        log: Mutex<Vec<String>>,
    }

    impl FakeCompiler {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                log: Mutex::new(Vec::new()),
            }
        }

        fn compiled_order(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Compiler for FakeCompiler {
        fn runtime_version(&self) -> String {
            "1.11.0".into()
        }
        fn in_sysimage(&self, _id: &PackageId) -> bool {
            false
        }
        fn is_stale(&self, _id: &PackageId, _source: Option<&PathBuf>) -> bool {
            true
        }
        async fn compile(&self, id: &PackageId, _project_file: &Path) -> CompileOutcome {
            self.log.lock().unwrap().push(id.name.clone());
            if self.failing.contains(&id.name) {
                CompileOutcome::Failed(format!("{} exploded", id.name))
            } else {
                CompileOutcome::Compiled
            }
        }
    }

    struct TestEnv {
        _depot: tempfile::TempDir,
        _envdir: tempfile::TempDir,
        runtime: Runtime,
        env: EnvCache,
    }

    fn setup(edges: &[(&str, &[&str])]) -> TestEnv {
        let depot = tempdir().unwrap();
        let envdir = tempdir().unwrap();
        let runtime = Runtime::new(
            Config {
                depots: vec![depot.path().to_path_buf()],
                precompile_auto: false,
                num_precompile_tasks: 4,
            },
            envdir.path().to_path_buf(),
        );
        let mut env = EnvCache::load(envdir.path()).unwrap();

        let uuids: BTreeMap<&str, Uuid> =
            edges.iter().map(|(name, _)| (*name, Uuid::new_v4())).collect();
        for (name, deps) in edges {
            let mut entry = ManifestEntry::new(*name);
            entry.deps = deps
                .iter()
                .map(|dep| (dep.to_string(), uuids[dep]))
                .collect();
            env.manifest.packages.insert(uuids[name], entry);
            env.project.deps.insert(name.to_string(), uuids[name]);
        }
        TestEnv {
            _depot: depot,
            _envdir: envdir,
            runtime,
            env,
        }
    }

    #[tokio::test]
    async fn dependencies_compile_before_dependents() {
        let t = setup(&[("A", &[]), ("B", &["A"]), ("C", &["B"])]);
        let compiler = FakeCompiler::new(&[]);
        let (_tx, rx) = cancellation();

        let report = precompile(
            &t.env,
            &t.runtime,
            &compiler,
            &SilentReporter,
            &PrecompileOptions::default(),
            rx,
        )
        .await
        .unwrap();

        assert_eq!(report.compiled, 3);
        let order = compiler.compiled_order();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("B") < pos("C"));
    }

    #[tokio::test]
    async fn cycle_is_broken_and_dependent_terminates() {
        let t = setup(&[("A", &["B"]), ("B", &["A"]), ("C", &["A"])]);
        let compiler = FakeCompiler::new(&[]);
        let (_tx, rx) = cancellation();

        let report = precompile(
            &t.env,
            &t.runtime,
            &compiler,
            &SilentReporter,
            &PrecompileOptions::default(),
            rx,
        )
        .await
        .unwrap();

        let circular: HashSet<String> =
            report.circular.iter().map(|id| id.name.clone()).collect();
        assert_eq!(circular, HashSet::from(["A".into(), "B".into()]));
        // C saw A's pre-notified latch and reached a terminal state itself.
        assert_eq!(compiler.compiled_order(), vec!["C".to_string()]);

        // Circular packages land in the persistent suspended set.
        let saved = suspend::load(
            t.runtime.primary_depot(),
            &t.env.project_file,
            "1.11.0",
        );
        assert!(saved.iter().any(|id| id.name == "A"));
    }

    #[tokio::test]
    async fn failure_is_recorded_and_suspended() {
        let t = setup(&[("A", &[]), ("B", &["A"])]);
        let compiler = FakeCompiler::new(&["A"]);
        let (_tx, rx) = cancellation();

        // A is a direct project dependency, so the run errors at the end.
        let result = precompile(
            &t.env,
            &t.runtime,
            &compiler,
            &SilentReporter,
            &PrecompileOptions { manual: true, verbose: false },
            rx,
        )
        .await;
        assert!(matches!(result, Err(CompileError::Failures(_))));

        // B was still attempted after A's terminal state.
        let order = compiler.compiled_order();
        assert_eq!(order, vec!["A".to_string(), "B".to_string()]);

        let saved = suspend::load(
            t.runtime.primary_depot(),
            &t.env.project_file,
            "1.11.0",
        );
        assert!(saved.iter().any(|id| id.name == "A"));
    }

    #[tokio::test]
    async fn suspended_package_skips_on_implicit_run() {
        let t = setup(&[("A", &[])]);
        let failing = FakeCompiler::new(&["A"]);
        let (_tx, rx) = cancellation();
        let _ = precompile(
            &t.env,
            &t.runtime,
            &failing,
            &SilentReporter,
            &PrecompileOptions::default(),
            rx,
        )
        .await;

        // Implicit run: the suspension short-circuits the broken package.
        let compiler = FakeCompiler::new(&[]);
        let (_tx, rx) = cancellation();
        let report = precompile(
            &t.env,
            &t.runtime,
            &compiler,
            &SilentReporter,
            &PrecompileOptions::default(),
            rx,
        )
        .await
        .unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert!(compiler.compiled_order().is_empty());

        // Manual run clears the suspension and retries.
        let (_tx, rx) = cancellation();
        let report = precompile(
            &t.env,
            &t.runtime,
            &compiler,
            &SilentReporter,
            &PrecompileOptions { manual: true, verbose: false },
            rx,
        )
        .await
        .unwrap();
        assert_eq!(report.compiled, 1);
    }

    #[tokio::test]
    async fn pre_cancelled_run_reaches_terminal_states_without_compiling() {
        let t = setup(&[("A", &[]), ("B", &["A"])]);
        let compiler = FakeCompiler::new(&[]);
        let (tx, rx) = cancellation();
        tx.send_replace(true);

        let report = precompile(
            &t.env,
            &t.runtime,
            &compiler,
            &SilentReporter,
            &PrecompileOptions::default(),
            rx,
        )
        .await
        .unwrap();
        assert!(report.interrupted);
        assert!(compiler.compiled_order().is_empty());
    }
}
