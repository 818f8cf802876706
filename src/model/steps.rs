// src/model/steps.rs

//! Units of work the state machine hands to the step runner.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::model::container::{Container, DockerContainer, DockerImage, DockerNetwork};

/// A single side effect to perform.
///
/// Steps are plain values: they carry exactly what the runner needs and
/// compare by value, so "is this step already queued?" is a simple `==`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStep {
    BeginTask,
    CreateTaskNetwork,
    BuildImage {
        container: Arc<Container>,
    },
    PullImage {
        image_name: String,
    },
    CreateContainer {
        container: Arc<Container>,
        /// Effective command (task override for the task container).
        command: Option<String>,
        /// Environment added on top of the container's own.
        additional_environment: BTreeMap<String, String>,
        image: DockerImage,
        network: DockerNetwork,
    },
    StartContainer {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    RunContainer {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    WaitForContainerToBecomeHealthy {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    RunContainerSetupCommands {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    StopContainer {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    RemoveContainer {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    /// Forced removal (stopping it if needed) after a failure.
    CleanUpContainer {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    DeleteTaskNetwork {
        network: DockerNetwork,
    },
    DeleteTemporaryFile {
        path: PathBuf,
    },
    DeleteTemporaryDirectory {
        path: PathBuf,
    },
    DisplayTaskFailure {
        message: String,
    },
    /// Cleanup after success is disabled: tell the user what was left
    /// behind. Not a failure.
    DisplayManualCleanupInstructions {
        message: String,
    },
    FinishTask {
        exit_code: i64,
    },
}

/// Field-less mirror of [`TaskStep`], used for "all steps of this type"
/// queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStepKind {
    BeginTask,
    CreateTaskNetwork,
    BuildImage,
    PullImage,
    CreateContainer,
    StartContainer,
    RunContainer,
    WaitForContainerToBecomeHealthy,
    RunContainerSetupCommands,
    StopContainer,
    RemoveContainer,
    CleanUpContainer,
    DeleteTaskNetwork,
    DeleteTemporaryFile,
    DeleteTemporaryDirectory,
    DisplayTaskFailure,
    DisplayManualCleanupInstructions,
    FinishTask,
}

impl TaskStep {
    pub fn kind(&self) -> TaskStepKind {
        match self {
            TaskStep::BeginTask => TaskStepKind::BeginTask,
            TaskStep::CreateTaskNetwork => TaskStepKind::CreateTaskNetwork,
            TaskStep::BuildImage { .. } => TaskStepKind::BuildImage,
            TaskStep::PullImage { .. } => TaskStepKind::PullImage,
            TaskStep::CreateContainer { .. } => TaskStepKind::CreateContainer,
            TaskStep::StartContainer { .. } => TaskStepKind::StartContainer,
            TaskStep::RunContainer { .. } => TaskStepKind::RunContainer,
            TaskStep::WaitForContainerToBecomeHealthy { .. } => {
                TaskStepKind::WaitForContainerToBecomeHealthy
            }
            TaskStep::RunContainerSetupCommands { .. } => TaskStepKind::RunContainerSetupCommands,
            TaskStep::StopContainer { .. } => TaskStepKind::StopContainer,
            TaskStep::RemoveContainer { .. } => TaskStepKind::RemoveContainer,
            TaskStep::CleanUpContainer { .. } => TaskStepKind::CleanUpContainer,
            TaskStep::DeleteTaskNetwork { .. } => TaskStepKind::DeleteTaskNetwork,
            TaskStep::DeleteTemporaryFile { .. } => TaskStepKind::DeleteTemporaryFile,
            TaskStep::DeleteTemporaryDirectory { .. } => TaskStepKind::DeleteTemporaryDirectory,
            TaskStep::DisplayTaskFailure { .. } => TaskStepKind::DisplayTaskFailure,
            TaskStep::DisplayManualCleanupInstructions { .. } => {
                TaskStepKind::DisplayManualCleanupInstructions
            }
            TaskStep::FinishTask { .. } => TaskStepKind::FinishTask,
        }
    }

    /// The container this step acts on, if any.
    pub fn container(&self) -> Option<&Arc<Container>> {
        match self {
            TaskStep::BuildImage { container }
            | TaskStep::CreateContainer { container, .. }
            | TaskStep::StartContainer { container, .. }
            | TaskStep::RunContainer { container, .. }
            | TaskStep::WaitForContainerToBecomeHealthy { container, .. }
            | TaskStep::RunContainerSetupCommands { container, .. }
            | TaskStep::StopContainer { container, .. }
            | TaskStep::RemoveContainer { container, .. }
            | TaskStep::CleanUpContainer { container, .. } => Some(container),
            _ => None,
        }
    }

    pub fn is_for_container(&self, name: &str) -> bool {
        self.container().is_some_and(|c| c.name == name)
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStep::PullImage { image_name } => write!(f, "PullImage '{image_name}'"),
            TaskStep::DeleteTaskNetwork { network } => {
                write!(f, "DeleteTaskNetwork '{}'", network.id)
            }
            TaskStep::DeleteTemporaryFile { path }
            | TaskStep::DeleteTemporaryDirectory { path } => {
                write!(f, "{:?} '{}'", self.kind(), path.display())
            }
            TaskStep::FinishTask { exit_code } => write!(f, "FinishTask (exit code {exit_code})"),
            _ => match self.container() {
                Some(container) => write!(f, "{:?} '{}'", self.kind(), container.name),
                None => write!(f, "{:?}", self.kind()),
            },
        }
    }
}
