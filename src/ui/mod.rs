//! Progress reporting trait for dependency injection.
//!
//! Core logic reports progress through this trait without coupling to a
//! specific front end; the CLI installs a console reporter, tests a silent
//! one.

use std::sync::Arc;

pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Precompiling", "Collecting garbage").
    fn section(&self, title: &str);

    /// Per-item progress, only emitted in verbose operations.
    fn item(&self, msg: &str);

    fn info(&self, msg: &str);

    fn warning(&self, msg: &str);

    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title)
    }
    fn item(&self, msg: &str) {
        (**self).item(msg)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn error(&self, msg: &str) {
        (**self).error(msg)
    }
}

/// Plain console reporter used by the CLI.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        eprintln!("{title:>12}");
    }
    fn item(&self, msg: &str) {
        eprintln!("  {msg}");
    }
    fn info(&self, msg: &str) {
        eprintln!("{msg}");
    }
    fn warning(&self, msg: &str) {
        eprintln!("Warning: {msg}");
    }
    fn error(&self, msg: &str) {
        eprintln!("Error: {msg}");
    }
}

/// Discards everything; used in tests and quiet mode.
#[derive(Debug, Clone, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn section(&self, _: &str) {}
    fn item(&self, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}
