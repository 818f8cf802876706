// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::DependencyResolutionError;
use crate::model::TaskEventKind;

#[derive(Error, Debug)]
pub enum TaskpodError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("{0}")]
    PrerequisiteCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    DependencyResolution(#[from] DependencyResolutionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Broken internal invariants of the orchestration engine.
///
/// These are never expected in a correct run and abort the whole task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Container '{0}' is not part of this dependency graph.")]
    ContainerNotInGraph(String),

    #[error("Multiple events of type {0:?} found.")]
    DuplicateEvent(TaskEventKind),

    #[error("No event of type {0:?} found.")]
    MissingEvent(TaskEventKind),

    #[error("Container '{0}' exited, but it is not the task container.")]
    NotTaskContainer(String),

    #[error(
        "None of the remaining steps are ready to execute, and no steps are currently running."
    )]
    NoStepsReady,
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskpodError>;
