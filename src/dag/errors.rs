// src/dag/errors.rs

use thiserror::Error;

/// Why a task's containers could not be arranged into a dependency graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyResolutionError {
    #[error("The task '{task}' does not have a `run` section, so it has no containers to start.")]
    TaskHasNoRunConfiguration { task: String },

    #[error("The container '{container}' referenced by {referenced_by} does not exist.")]
    ContainerDoesNotExist {
        container: String,
        referenced_by: String,
    },

    #[error("The container '{container}' cannot depend on itself.")]
    SelfDependency { container: String },

    #[error(
        "The task '{task}' cannot have the container '{container}' as both the main task \
         container and also a dependency."
    )]
    TaskContainerIsDependency { task: String, container: String },

    #[error("There is a dependency cycle in task '{task}'. {description}")]
    Cycle { task: String, description: String },
}
