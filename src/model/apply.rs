// src/model/apply.rs

//! Event transitions: what each event queues next.
//!
//! Readiness is driven entirely by events. A container becomes eligible to
//! start exactly when the last thing it was waiting for is reported, so
//! nothing here polls.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::dag::{DependencyGraph, DependencyGraphNode};
use crate::errors::EngineError;
use crate::model::container::{Container, DockerContainer, DockerImage, DockerNetwork, ImageSource};
use crate::model::context::TaskEventContext;
use crate::model::events::{TaskEvent, TaskEventKind};
use crate::model::failure;
use crate::model::history;
use crate::model::steps::TaskStep;
use crate::rules::{self, CleanupRule, planner};
use crate::types::CleanupBehaviour;

impl TaskEvent {
    /// Apply this event: queue follow-up steps and install cleanup rules.
    ///
    /// The event has already been appended to the log when this runs.
    pub fn apply(&self, ctx: &mut dyn TaskEventContext) -> Result<(), EngineError> {
        use TaskEvent as E;

        match self {
            E::TaskStarted => on_task_started(ctx),
            E::TaskNetworkCreated { network } => on_network_created(ctx, network),
            E::ImageBuilt { container, image } => {
                on_image_ready(ctx, vec![Arc::clone(container)], image)
            }
            E::ImagePulled { image_name, image } => {
                let graph = ctx.graph();
                let containers: Vec<Arc<Container>> = graph
                    .all_containers()
                    .filter(|c| match &c.image_source {
                        ImageSource::Pull { image_name: n } => n == image_name,
                        _ => false,
                    })
                    .cloned()
                    .collect();
                on_image_ready(ctx, containers, image)
            }
            E::ContainerCreated {
                container,
                docker_container,
            } => on_container_created(ctx, container, docker_container),
            E::ContainerStarted { container } => on_container_started(ctx, container),
            E::ContainerBecameHealthy { container } => on_container_healthy(ctx, container),
            E::ContainerSetupCommandsCompleted { container } => {
                if ctx.is_aborting() {
                    return Ok(());
                }
                start_ready_dependents(ctx, container)
            }
            E::RunningContainerExited {
                container,
                exit_code,
            } => on_task_container_exited(ctx, container, *exit_code),
            E::TemporaryFileCreated { .. } | E::TemporaryDirectoryCreated { .. } => {
                if let Some(rule) = planner::temporary_path_rule(self) {
                    ctx.install_rule(rule);
                }
                Ok(())
            }
            // Installed cleanup rules react to these.
            E::ContainerStopped { .. }
            | E::ContainerRemoved { .. }
            | E::TemporaryFileDeleted { .. }
            | E::TemporaryDirectoryDeleted { .. } => Ok(()),
            E::TaskNetworkDeleted => on_network_deleted(ctx),
            E::TaskNetworkCreationFailed { .. }
            | E::ImageBuildFailed { .. }
            | E::ImagePullFailed { .. }
            | E::ContainerCreationFailed { .. }
            | E::ContainerStartFailed { .. }
            | E::ContainerDidNotBecomeHealthy { .. }
            | E::ContainerRunFailed { .. }
            | E::SetupCommandFailed { .. }
            | E::ExecutionFailed { .. }
            | E::UserInterruptedExecution => failure::handle_pre_run_failure(ctx, self),
            E::ContainerStopFailed { .. }
            | E::ContainerRemovalFailed { .. }
            | E::TaskNetworkDeletionFailed { .. }
            | E::TemporaryFileDeletionFailed { .. }
            | E::TemporaryDirectoryDeletionFailed { .. } => {
                failure::handle_cleanup_failure(ctx, self)
            }
        }
    }
}

fn on_task_started(ctx: &mut dyn TaskEventContext) -> Result<(), EngineError> {
    ctx.queue_step(TaskStep::CreateTaskNetwork);

    let graph = ctx.graph();
    let mut pulled: BTreeSet<&str> = BTreeSet::new();

    for container in graph.all_containers() {
        match &container.image_source {
            ImageSource::Build { .. } => ctx.queue_step(TaskStep::BuildImage {
                container: Arc::clone(container),
            }),
            ImageSource::Pull { image_name } => {
                if pulled.insert(image_name.as_str()) {
                    ctx.queue_step(TaskStep::PullImage {
                        image_name: image_name.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn on_network_created(
    ctx: &mut dyn TaskEventContext,
    network: &DockerNetwork,
) -> Result<(), EngineError> {
    if ctx.is_aborting() {
        ctx.queue_step(TaskStep::DeleteTaskNetwork {
            network: network.clone(),
        });
        return Ok(());
    }

    let graph = ctx.graph();
    let ready: Vec<(Arc<Container>, DockerImage)> = graph
        .all_containers()
        .filter_map(|c| {
            history::image_for(ctx.events(), c).map(|image| (Arc::clone(c), image.clone()))
        })
        .collect();

    for (container, image) in ready {
        queue_create_container(ctx, &graph, container, image, network.clone());
    }

    Ok(())
}

fn on_image_ready(
    ctx: &mut dyn TaskEventContext,
    containers: Vec<Arc<Container>>,
    image: &DockerImage,
) -> Result<(), EngineError> {
    if ctx.is_aborting() {
        return Ok(());
    }

    let Some(network) = history::task_network(ctx.events()).cloned() else {
        return Ok(());
    };

    let graph = ctx.graph();
    for container in containers {
        queue_create_container(ctx, &graph, container, image.clone(), network.clone());
    }

    Ok(())
}

fn queue_create_container(
    ctx: &mut dyn TaskEventContext,
    graph: &DependencyGraph,
    container: Arc<Container>,
    image: DockerImage,
    network: DockerNetwork,
) {
    let (command, additional_environment) = if graph.is_root(&container.name) {
        let run = graph.run_configuration();
        (
            run.command.clone().or_else(|| container.command.clone()),
            run.environment.clone(),
        )
    } else {
        (container.command.clone(), BTreeMap::new())
    };

    ctx.queue_step(TaskStep::CreateContainer {
        container,
        command,
        additional_environment,
        image,
        network,
    });
}

fn on_container_created(
    ctx: &mut dyn TaskEventContext,
    container: &Arc<Container>,
    docker_container: &DockerContainer,
) -> Result<(), EngineError> {
    if ctx.is_aborting() {
        ctx.queue_step(TaskStep::CleanUpContainer {
            container: Arc::clone(container),
            docker_container: docker_container.clone(),
        });
        return Ok(());
    }

    let graph = ctx.graph();
    let node = graph.node_for(&container.name)?;
    if dependencies_ready(ctx.events(), &graph, node)? {
        queue_start_or_run(ctx, &graph, container, docker_container);
    }

    Ok(())
}

fn on_container_started(
    ctx: &mut dyn TaskEventContext,
    container: &Arc<Container>,
) -> Result<(), EngineError> {
    if ctx.is_aborting() {
        return Ok(());
    }

    let docker_container = created(ctx, &container.name)?;
    ctx.queue_step(TaskStep::WaitForContainerToBecomeHealthy {
        container: Arc::clone(container),
        docker_container,
    });
    Ok(())
}

fn on_container_healthy(
    ctx: &mut dyn TaskEventContext,
    container: &Arc<Container>,
) -> Result<(), EngineError> {
    if ctx.is_aborting() {
        return Ok(());
    }

    if container.has_setup_commands() {
        let docker_container = created(ctx, &container.name)?;
        ctx.queue_step(TaskStep::RunContainerSetupCommands {
            container: Arc::clone(container),
            docker_container,
        });
        return Ok(());
    }

    start_ready_dependents(ctx, container)
}

/// Start every dependent of `container` that is created and now has all of
/// its dependencies ready.
fn start_ready_dependents(
    ctx: &mut dyn TaskEventContext,
    container: &Arc<Container>,
) -> Result<(), EngineError> {
    let graph = ctx.graph();
    let node = graph.node_for(&container.name)?;

    for dependent_name in node.depended_on_by() {
        let dependent = graph.node_for(dependent_name)?;

        let Some(docker_container) =
            history::docker_container(ctx.events(), dependent_name).cloned()
        else {
            continue;
        };

        if dependencies_ready(ctx.events(), &graph, dependent)? {
            queue_start_or_run(ctx, &graph, dependent.container(), &docker_container);
        } else {
            debug!(
                container = %dependent_name,
                "dependent still waiting on other dependencies"
            );
        }
    }

    Ok(())
}

fn dependencies_ready(
    events: &[TaskEvent],
    graph: &DependencyGraph,
    node: &DependencyGraphNode,
) -> Result<bool, EngineError> {
    for dependency in node.depends_on() {
        let dependency = graph.node_for(dependency)?;
        if !history::is_ready(events, dependency.container()) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn queue_start_or_run(
    ctx: &mut dyn TaskEventContext,
    graph: &DependencyGraph,
    container: &Arc<Container>,
    docker_container: &DockerContainer,
) {
    let name = container.name.as_str();
    let already_queued = ctx.has_pending_or_processed_step(&|step: &TaskStep| {
        matches!(
            step,
            TaskStep::StartContainer { .. } | TaskStep::RunContainer { .. }
        ) && step.is_for_container(name)
    });
    if already_queued {
        return;
    }

    let container = Arc::clone(container);
    let docker_container = docker_container.clone();

    if graph.is_root(name) {
        ctx.queue_step(TaskStep::RunContainer {
            container,
            docker_container,
        });
    } else {
        ctx.queue_step(TaskStep::StartContainer {
            container,
            docker_container,
        });
    }
}

fn on_task_container_exited(
    ctx: &mut dyn TaskEventContext,
    container: &Arc<Container>,
    exit_code: i64,
) -> Result<(), EngineError> {
    let graph = ctx.graph();
    if !graph.is_root(&container.name) {
        return Err(EngineError::NotTaskContainer(container.name.clone()));
    }

    if ctx.is_aborting() {
        return Ok(());
    }

    if ctx.behaviour_after_success() == CleanupBehaviour::DontCleanup {
        leave_everything_behind(ctx, exit_code);
        return Ok(());
    }

    for rule in planner::post_run_rules(&graph, ctx.events())? {
        ctx.install_rule(rule);
    }
    Ok(())
}

/// Cleanup after success is disabled: finish straight away and print how
/// to remove the containers, temporary files and network by hand.
fn leave_everything_behind(ctx: &mut dyn TaskEventContext, exit_code: i64) {
    let mut left_behind: Vec<(Arc<Container>, DockerContainer)> =
        history::created_containers(ctx.events())
            .into_iter()
            .map(|(container, docker_container)| (Arc::clone(container), docker_container.clone()))
            .collect();
    left_behind.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));
    let temporary_paths =
        ctx.remove_pending_rules(&|rule: &CleanupRule| rule.is_temporary_path());

    let message = failure::left_behind_message(
        ctx.events(),
        "cleanup after success",
        "Once you have finished using the containers",
        &left_behind,
        &rules::manual_cleanup_commands(&temporary_paths),
    );

    ctx.queue_step(TaskStep::DisplayManualCleanupInstructions { message });
    ctx.queue_step(TaskStep::FinishTask { exit_code });
}

fn on_network_deleted(ctx: &mut dyn TaskEventContext) -> Result<(), EngineError> {
    if ctx.is_aborting() {
        return Ok(());
    }

    let exit_code = match ctx.single_past_event_of_kind(TaskEventKind::RunningContainerExited)? {
        Some(TaskEvent::RunningContainerExited { exit_code, .. }) => *exit_code,
        _ => return Err(EngineError::MissingEvent(TaskEventKind::RunningContainerExited)),
    };

    ctx.queue_step(TaskStep::FinishTask { exit_code });
    Ok(())
}

fn created(ctx: &dyn TaskEventContext, name: &str) -> Result<DockerContainer, EngineError> {
    history::docker_container(ctx.events(), name)
        .cloned()
        .ok_or(EngineError::MissingEvent(TaskEventKind::ContainerCreated))
}
