// src/exec/step_runner.rs

//! Turns one [`TaskStep`] into the events describing what happened.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info};

use crate::exec::backend::{ContainerEngine, CreateContainerRequest, HealthStatus};
use crate::exec::event_logger::EventLogger;
use crate::model::{Container, DockerContainer, TaskEvent, TaskStep};

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Vec<TaskEvent>> + Send + 'a>>;

/// Executes steps for the execution manager.
///
/// Never fails: every outcome, including errors, is reported as events.
pub trait StepRunner: Send + Sync + 'static {
    fn run(&self, step: TaskStep) -> StepFuture<'_>;
}

/// The production runner: one [`ContainerEngine`] call per container step.
pub struct TaskStepRunner<E: ContainerEngine> {
    engine: Arc<E>,
    logger: Arc<dyn EventLogger>,
}

impl<E: ContainerEngine> TaskStepRunner<E> {
    pub fn new(engine: Arc<E>, logger: Arc<dyn EventLogger>) -> Self {
        Self { engine, logger }
    }

    async fn execute(&self, step: TaskStep) -> Vec<TaskEvent> {
        let engine = self.engine.as_ref();

        match step {
            TaskStep::BeginTask => vec![TaskEvent::TaskStarted],

            TaskStep::CreateTaskNetwork => match engine.create_network().await {
                Ok(network) => vec![TaskEvent::TaskNetworkCreated { network }],
                Err(e) => vec![TaskEvent::TaskNetworkCreationFailed { message: e.message }],
            },

            TaskStep::BuildImage { container } => match engine.build_image(&container).await {
                Ok(image) => vec![TaskEvent::ImageBuilt { container, image }],
                Err(e) => vec![TaskEvent::ImageBuildFailed {
                    container,
                    message: e.message,
                }],
            },

            TaskStep::PullImage { image_name } => match engine.pull_image(&image_name).await {
                Ok(image) => vec![TaskEvent::ImagePulled { image_name, image }],
                Err(e) => vec![TaskEvent::ImagePullFailed {
                    image_name,
                    message: e.message,
                }],
            },

            TaskStep::CreateContainer {
                container,
                command,
                additional_environment,
                image,
                network,
            } => {
                let request = CreateContainerRequest {
                    container,
                    command,
                    additional_environment,
                    image,
                    network,
                };
                let container = Arc::clone(&request.container);

                match engine.create_container(&request).await {
                    Ok(created) => {
                        // Temporary paths first so their cleanup rules exist
                        // before anything can remove the container.
                        let mut events: Vec<TaskEvent> = created
                            .temporary_files
                            .into_iter()
                            .map(|path| TaskEvent::TemporaryFileCreated {
                                container: Arc::clone(&container),
                                path,
                            })
                            .collect();
                        events.extend(created.temporary_directories.into_iter().map(|path| {
                            TaskEvent::TemporaryDirectoryCreated {
                                container: Arc::clone(&container),
                                path,
                            }
                        }));
                        events.push(TaskEvent::ContainerCreated {
                            container,
                            docker_container: created.docker_container,
                        });
                        events
                    }
                    Err(e) => vec![TaskEvent::ContainerCreationFailed {
                        container,
                        message: e.message,
                    }],
                }
            }

            TaskStep::StartContainer {
                container,
                docker_container,
            } => match engine.start_container(&container, &docker_container).await {
                Ok(()) => vec![TaskEvent::ContainerStarted { container }],
                Err(e) => vec![TaskEvent::ContainerStartFailed {
                    container,
                    message: e.message,
                }],
            },

            TaskStep::RunContainer {
                container,
                docker_container,
            } => match engine.run_container(&container, &docker_container).await {
                Ok(exit_code) => {
                    info!(container = %container.name, exit_code, "task container exited");
                    vec![TaskEvent::RunningContainerExited {
                        container,
                        exit_code,
                    }]
                }
                Err(e) => vec![TaskEvent::ContainerRunFailed {
                    container,
                    message: e.message,
                }],
            },

            TaskStep::WaitForContainerToBecomeHealthy {
                container,
                docker_container,
            } => {
                let status = engine.wait_for_health(&container, &docker_container).await;
                health_events(container, status)
            }

            TaskStep::RunContainerSetupCommands {
                container,
                docker_container,
            } => self.run_setup_commands(container, &docker_container).await,

            TaskStep::StopContainer {
                container,
                docker_container,
            } => match engine.stop_container(&container, &docker_container).await {
                Ok(()) => vec![TaskEvent::ContainerStopped { container }],
                Err(e) => vec![TaskEvent::ContainerStopFailed {
                    container,
                    message: e.message,
                }],
            },

            TaskStep::RemoveContainer {
                container,
                docker_container,
            } => remove(engine, container, &docker_container, false).await,

            TaskStep::CleanUpContainer {
                container,
                docker_container,
            } => remove(engine, container, &docker_container, true).await,

            TaskStep::DeleteTaskNetwork { network } => match engine.delete_network(&network).await
            {
                Ok(()) => vec![TaskEvent::TaskNetworkDeleted],
                Err(e) => vec![TaskEvent::TaskNetworkDeletionFailed {
                    network,
                    message: e.message,
                }],
            },

            TaskStep::DeleteTemporaryFile { path } => match tokio::fs::remove_file(&path).await {
                Ok(()) => vec![TaskEvent::TemporaryFileDeleted { path }],
                Err(e) => vec![TaskEvent::TemporaryFileDeletionFailed {
                    path,
                    message: e.to_string(),
                }],
            },

            TaskStep::DeleteTemporaryDirectory { path } => {
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => vec![TaskEvent::TemporaryDirectoryDeleted { path }],
                    Err(e) => vec![TaskEvent::TemporaryDirectoryDeletionFailed {
                        path,
                        message: e.to_string(),
                    }],
                }
            }

            TaskStep::DisplayTaskFailure { message } => {
                self.logger.on_task_failure(&message);
                Vec::new()
            }

            TaskStep::DisplayManualCleanupInstructions { message } => {
                self.logger.on_manual_cleanup_required(&message);
                Vec::new()
            }

            // Handled by the execution manager; nothing to do here.
            TaskStep::FinishTask { .. } => Vec::new(),
        }
    }

    /// Run setup commands in order, stopping at the first failure.
    async fn run_setup_commands(
        &self,
        container: Arc<Container>,
        docker_container: &DockerContainer,
    ) -> Vec<TaskEvent> {
        for command in &container.setup_commands {
            debug!(container = %container.name, command = %command, "running setup command");

            let message = match self
                .engine
                .run_setup_command(&container, docker_container, command)
                .await
            {
                Ok(output) if output.exit_code == 0 => continue,
                Ok(output) => format!(
                    "The command exited with code {} and output:\n{}",
                    output.exit_code,
                    output.output.trim_end()
                ),
                Err(e) => e.message,
            };

            return vec![TaskEvent::SetupCommandFailed {
                container: Arc::clone(&container),
                command: command.clone(),
                message,
            }];
        }

        vec![TaskEvent::ContainerSetupCommandsCompleted { container }]
    }
}

impl<E: ContainerEngine> StepRunner for TaskStepRunner<E> {
    fn run(&self, step: TaskStep) -> StepFuture<'_> {
        Box::pin(self.execute(step))
    }
}

fn health_events(
    container: Arc<Container>,
    status: Result<HealthStatus, crate::exec::EngineFailure>,
) -> Vec<TaskEvent> {
    let message = match status {
        Ok(HealthStatus::NoHealthCheck) | Ok(HealthStatus::BecameHealthy) => {
            return vec![TaskEvent::ContainerBecameHealthy { container }];
        }
        Ok(HealthStatus::BecameUnhealthy { last_output }) => format!(
            "The configured health check did not indicate that the container was healthy within \
             the timeout period. The last health check output was: {}",
            last_output.trim_end()
        ),
        Ok(HealthStatus::Exited { exit_code }) => format!(
            "The container exited before becoming healthy (exit code {exit_code})."
        ),
        Err(e) => e.message,
    };

    vec![TaskEvent::ContainerDidNotBecomeHealthy { container, message }]
}

async fn remove<E: ContainerEngine>(
    engine: &E,
    container: Arc<Container>,
    docker_container: &DockerContainer,
    force: bool,
) -> Vec<TaskEvent> {
    match engine
        .remove_container(&container, docker_container, force)
        .await
    {
        Ok(()) => vec![TaskEvent::ContainerRemoved { container }],
        Err(e) => vec![TaskEvent::ContainerRemovalFailed {
            container,
            message: e.message,
        }],
    }
}
