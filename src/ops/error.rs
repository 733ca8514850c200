//! Domain-specific errors for package operations.

use thiserror::Error;

use crate::compile::CompileError;
use crate::env::undo::UndoError;
use crate::env::EnvError;
use crate::gc::GcError;

#[derive(Error, Debug)]
pub enum OpError {
    #[error("invalid package spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Undo(#[from] UndoError),

    #[error(transparent)]
    Gc(#[from] GcError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("package {0} not found in the manifest")]
    NotFound(String),

    #[error("registry failure: {0}")]
    Registry(anyhow::Error),

    #[error("git failure: {0}")]
    Git(anyhow::Error),

    #[error("download failure: {0}")]
    Download(anyhow::Error),

    #[error("build failure: {0}")]
    Build(anyhow::Error),

    #[error("resolver failure: {0}")]
    Resolve(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
