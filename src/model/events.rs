// src/model/events.rs

//! Facts reported back by the step runner (and by the interrupt source).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::model::container::{Container, DockerContainer, DockerImage, DockerNetwork};

/// Something that happened while running a task.
///
/// Events are appended to the state machine's log in the order they are
/// posted and never removed. What each event causes is decided in
/// `model::apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    TaskStarted,
    TaskNetworkCreated {
        network: DockerNetwork,
    },
    ImageBuilt {
        container: Arc<Container>,
        image: DockerImage,
    },
    ImagePulled {
        image_name: String,
        image: DockerImage,
    },
    ContainerCreated {
        container: Arc<Container>,
        docker_container: DockerContainer,
    },
    ContainerStarted {
        container: Arc<Container>,
    },
    ContainerBecameHealthy {
        container: Arc<Container>,
    },
    ContainerSetupCommandsCompleted {
        container: Arc<Container>,
    },
    RunningContainerExited {
        container: Arc<Container>,
        exit_code: i64,
    },
    ContainerStopped {
        container: Arc<Container>,
    },
    ContainerRemoved {
        container: Arc<Container>,
    },
    TaskNetworkDeleted,
    TemporaryFileCreated {
        container: Arc<Container>,
        path: PathBuf,
    },
    TemporaryDirectoryCreated {
        container: Arc<Container>,
        path: PathBuf,
    },
    TemporaryFileDeleted {
        path: PathBuf,
    },
    TemporaryDirectoryDeleted {
        path: PathBuf,
    },

    // Failures before or while the task container runs.
    TaskNetworkCreationFailed {
        message: String,
    },
    ImageBuildFailed {
        container: Arc<Container>,
        message: String,
    },
    ImagePullFailed {
        image_name: String,
        message: String,
    },
    ContainerCreationFailed {
        container: Arc<Container>,
        message: String,
    },
    ContainerStartFailed {
        container: Arc<Container>,
        message: String,
    },
    ContainerDidNotBecomeHealthy {
        container: Arc<Container>,
        message: String,
    },
    ContainerRunFailed {
        container: Arc<Container>,
        message: String,
    },
    SetupCommandFailed {
        container: Arc<Container>,
        command: String,
        message: String,
    },
    ExecutionFailed {
        message: String,
    },
    UserInterruptedExecution,

    // Failures while tearing down.
    ContainerStopFailed {
        container: Arc<Container>,
        message: String,
    },
    ContainerRemovalFailed {
        container: Arc<Container>,
        message: String,
    },
    TaskNetworkDeletionFailed {
        network: DockerNetwork,
        message: String,
    },
    TemporaryFileDeletionFailed {
        path: PathBuf,
        message: String,
    },
    TemporaryDirectoryDeletionFailed {
        path: PathBuf,
        message: String,
    },
}

/// Field-less mirror of [`TaskEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskEventKind {
    TaskStarted,
    TaskNetworkCreated,
    ImageBuilt,
    ImagePulled,
    ContainerCreated,
    ContainerStarted,
    ContainerBecameHealthy,
    ContainerSetupCommandsCompleted,
    RunningContainerExited,
    ContainerStopped,
    ContainerRemoved,
    TaskNetworkDeleted,
    TemporaryFileCreated,
    TemporaryDirectoryCreated,
    TemporaryFileDeleted,
    TemporaryDirectoryDeleted,
    TaskNetworkCreationFailed,
    ImageBuildFailed,
    ImagePullFailed,
    ContainerCreationFailed,
    ContainerStartFailed,
    ContainerDidNotBecomeHealthy,
    ContainerRunFailed,
    SetupCommandFailed,
    ExecutionFailed,
    UserInterruptedExecution,
    ContainerStopFailed,
    ContainerRemovalFailed,
    TaskNetworkDeletionFailed,
    TemporaryFileDeletionFailed,
    TemporaryDirectoryDeletionFailed,
}

impl TaskEvent {
    pub fn kind(&self) -> TaskEventKind {
        use TaskEvent as E;
        use TaskEventKind as K;

        match self {
            E::TaskStarted => K::TaskStarted,
            E::TaskNetworkCreated { .. } => K::TaskNetworkCreated,
            E::ImageBuilt { .. } => K::ImageBuilt,
            E::ImagePulled { .. } => K::ImagePulled,
            E::ContainerCreated { .. } => K::ContainerCreated,
            E::ContainerStarted { .. } => K::ContainerStarted,
            E::ContainerBecameHealthy { .. } => K::ContainerBecameHealthy,
            E::ContainerSetupCommandsCompleted { .. } => K::ContainerSetupCommandsCompleted,
            E::RunningContainerExited { .. } => K::RunningContainerExited,
            E::ContainerStopped { .. } => K::ContainerStopped,
            E::ContainerRemoved { .. } => K::ContainerRemoved,
            E::TaskNetworkDeleted => K::TaskNetworkDeleted,
            E::TemporaryFileCreated { .. } => K::TemporaryFileCreated,
            E::TemporaryDirectoryCreated { .. } => K::TemporaryDirectoryCreated,
            E::TemporaryFileDeleted { .. } => K::TemporaryFileDeleted,
            E::TemporaryDirectoryDeleted { .. } => K::TemporaryDirectoryDeleted,
            E::TaskNetworkCreationFailed { .. } => K::TaskNetworkCreationFailed,
            E::ImageBuildFailed { .. } => K::ImageBuildFailed,
            E::ImagePullFailed { .. } => K::ImagePullFailed,
            E::ContainerCreationFailed { .. } => K::ContainerCreationFailed,
            E::ContainerStartFailed { .. } => K::ContainerStartFailed,
            E::ContainerDidNotBecomeHealthy { .. } => K::ContainerDidNotBecomeHealthy,
            E::ContainerRunFailed { .. } => K::ContainerRunFailed,
            E::SetupCommandFailed { .. } => K::SetupCommandFailed,
            E::ExecutionFailed { .. } => K::ExecutionFailed,
            E::UserInterruptedExecution => K::UserInterruptedExecution,
            E::ContainerStopFailed { .. } => K::ContainerStopFailed,
            E::ContainerRemovalFailed { .. } => K::ContainerRemovalFailed,
            E::TaskNetworkDeletionFailed { .. } => K::TaskNetworkDeletionFailed,
            E::TemporaryFileDeletionFailed { .. } => K::TemporaryFileDeletionFailed,
            E::TemporaryDirectoryDeletionFailed { .. } => K::TemporaryDirectoryDeletionFailed,
        }
    }

    /// The container this event is about, if any.
    pub fn container(&self) -> Option<&Arc<Container>> {
        use TaskEvent as E;

        match self {
            E::ImageBuilt { container, .. }
            | E::ContainerCreated { container, .. }
            | E::ContainerStarted { container }
            | E::ContainerBecameHealthy { container }
            | E::ContainerSetupCommandsCompleted { container }
            | E::RunningContainerExited { container, .. }
            | E::ContainerStopped { container }
            | E::ContainerRemoved { container }
            | E::TemporaryFileCreated { container, .. }
            | E::TemporaryDirectoryCreated { container, .. }
            | E::ImageBuildFailed { container, .. }
            | E::ContainerCreationFailed { container, .. }
            | E::ContainerStartFailed { container, .. }
            | E::ContainerDidNotBecomeHealthy { container, .. }
            | E::ContainerRunFailed { container, .. }
            | E::SetupCommandFailed { container, .. }
            | E::ContainerStopFailed { container, .. }
            | E::ContainerRemovalFailed { container, .. } => Some(container),
            _ => None,
        }
    }

    pub fn is_for_container(&self, name: &str) -> bool {
        self.container().is_some_and(|c| c.name == name)
    }

    /// Failures that happen before the task container has finished running.
    pub fn is_pre_run_failure(&self) -> bool {
        matches!(
            self.kind(),
            TaskEventKind::TaskNetworkCreationFailed
                | TaskEventKind::ImageBuildFailed
                | TaskEventKind::ImagePullFailed
                | TaskEventKind::ContainerCreationFailed
                | TaskEventKind::ContainerStartFailed
                | TaskEventKind::ContainerDidNotBecomeHealthy
                | TaskEventKind::ContainerRunFailed
                | TaskEventKind::SetupCommandFailed
                | TaskEventKind::ExecutionFailed
                | TaskEventKind::UserInterruptedExecution
        )
    }

    /// Failures while stopping or removing what the task created.
    pub fn is_cleanup_failure(&self) -> bool {
        matches!(
            self.kind(),
            TaskEventKind::ContainerStopFailed
                | TaskEventKind::ContainerRemovalFailed
                | TaskEventKind::TaskNetworkDeletionFailed
                | TaskEventKind::TemporaryFileDeletionFailed
                | TaskEventKind::TemporaryDirectoryDeletionFailed
        )
    }

    pub fn is_failure(&self) -> bool {
        self.is_pre_run_failure() || self.is_cleanup_failure()
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TaskEvent as E;

        match self {
            E::TaskStarted => write!(f, "task started"),
            E::TaskNetworkCreated { network } => write!(f, "task network '{}' created", network.id),
            E::ImageBuilt { container, image } => {
                write!(f, "image '{}' built for container '{}'", image.id, container.name)
            }
            E::ImagePulled { image_name, .. } => write!(f, "image '{image_name}' pulled"),
            E::ContainerCreated {
                container,
                docker_container,
            } => write!(
                f,
                "container '{}' created with ID '{}'",
                container.name, docker_container.id
            ),
            E::ContainerStarted { container } => {
                write!(f, "container '{}' started", container.name)
            }
            E::ContainerBecameHealthy { container } => {
                write!(f, "container '{}' became healthy", container.name)
            }
            E::ContainerSetupCommandsCompleted { container } => {
                write!(f, "setup commands for container '{}' completed", container.name)
            }
            E::RunningContainerExited {
                container,
                exit_code,
            } => write!(
                f,
                "container '{}' exited with exit code {exit_code}",
                container.name
            ),
            E::ContainerStopped { container } => {
                write!(f, "container '{}' stopped", container.name)
            }
            E::ContainerRemoved { container } => {
                write!(f, "container '{}' removed", container.name)
            }
            E::TaskNetworkDeleted => write!(f, "task network deleted"),
            E::TemporaryFileCreated { container, path } => write!(
                f,
                "temporary file '{}' created for container '{}'",
                path.display(),
                container.name
            ),
            E::TemporaryDirectoryCreated { container, path } => write!(
                f,
                "temporary directory '{}' created for container '{}'",
                path.display(),
                container.name
            ),
            E::TemporaryFileDeleted { path } => {
                write!(f, "temporary file '{}' deleted", path.display())
            }
            E::TemporaryDirectoryDeleted { path } => {
                write!(f, "temporary directory '{}' deleted", path.display())
            }
            E::TaskNetworkCreationFailed { message } => {
                write!(f, "Could not create network for task: {message}")
            }
            E::ImageBuildFailed { container, message } => write!(
                f,
                "Could not build image for container '{}': {message}",
                container.name
            ),
            E::ImagePullFailed {
                image_name,
                message,
            } => write!(f, "Could not pull image '{image_name}': {message}"),
            E::ContainerCreationFailed { container, message } => {
                write!(f, "Could not create container '{}': {message}", container.name)
            }
            E::ContainerStartFailed { container, message } => {
                write!(f, "Could not start container '{}': {message}", container.name)
            }
            E::ContainerDidNotBecomeHealthy { container, message } => write!(
                f,
                "Container '{}' did not become healthy: {message}",
                container.name
            ),
            E::ContainerRunFailed { container, message } => {
                write!(f, "Could not run container '{}': {message}", container.name)
            }
            E::SetupCommandFailed {
                container,
                command,
                message,
            } => write!(
                f,
                "Setup command '{command}' for container '{}' failed: {message}",
                container.name
            ),
            E::ExecutionFailed { message } => {
                write!(f, "An unexpected error occurred during execution: {message}")
            }
            E::UserInterruptedExecution => write!(f, "The task was interrupted."),
            E::ContainerStopFailed { container, message } => {
                write!(f, "the container '{}' could not be stopped: {message}", container.name)
            }
            E::ContainerRemovalFailed { container, message } => {
                write!(f, "the container '{}' could not be removed: {message}", container.name)
            }
            E::TaskNetworkDeletionFailed { network, message } => write!(
                f,
                "the task network '{}' could not be deleted: {message}",
                network.id
            ),
            E::TemporaryFileDeletionFailed { path, message } => write!(
                f,
                "the temporary file '{}' could not be deleted: {message}",
                path.display()
            ),
            E::TemporaryDirectoryDeletionFailed { path, message } => write!(
                f,
                "the temporary directory '{}' could not be deleted: {message}",
                path.display()
            ),
        }
    }
}
