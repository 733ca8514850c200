//! Shared operation context.
//!
//! Groups the runtime with the external collaborators so operation entry
//! points take one handle instead of seven.

use std::sync::Arc;

use crate::external::defaults::{
    CliGit, FixedResolver, HttpDownloader, JuliaCompiler, OfflineRegistry, ShellBuildRunner,
};
use crate::external::{BuildRunner, Compiler, Downloader, GitSource, Registry, Resolver};
use crate::runtime::Runtime;
use crate::ui::{ConsoleReporter, Reporter};

pub struct Context {
    pub runtime: Runtime,
    pub resolver: Arc<dyn Resolver>,
    pub registry: Arc<dyn Registry>,
    pub git: Arc<dyn GitSource>,
    pub downloader: Arc<dyn Downloader>,
    pub builder: Arc<dyn BuildRunner>,
    pub compiler: Arc<dyn Compiler>,
    pub reporter: Arc<dyn Reporter>,
}

impl Context {
    /// Context wired to the default collaborators.
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            resolver: Arc::new(FixedResolver),
            registry: Arc::new(OfflineRegistry),
            git: Arc::new(CliGit),
            downloader: Arc::new(HttpDownloader::default()),
            builder: Arc::new(ShellBuildRunner),
            compiler: Arc::new(JuliaCompiler::default()),
            reporter: Arc::new(ConsoleReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }
}
