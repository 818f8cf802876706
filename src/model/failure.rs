// src/model/failure.rs

//! Failure transitions.
//!
//! Any failure flips the state machine into aborting mode. Failures before
//! the task container finished cancel all outstanding progress and force
//! removal of whatever exists; failures during teardown switch the rest of
//! the teardown to forced removal and tell the user what to clean up by
//! hand.

use std::sync::Arc;

use tracing::warn;

use crate::errors::EngineError;
use crate::model::container::{Container, DockerContainer};
use crate::model::context::TaskEventContext;
use crate::model::events::{TaskEvent, TaskEventKind};
use crate::model::history;
use crate::model::steps::{TaskStep, TaskStepKind};
use crate::rules::{self, CleanupRule, planner};
use crate::types::CleanupBehaviour;

const PROGRESS_STEPS: [TaskStepKind; 9] = [
    TaskStepKind::CreateTaskNetwork,
    TaskStepKind::BuildImage,
    TaskStepKind::PullImage,
    TaskStepKind::CreateContainer,
    TaskStepKind::StartContainer,
    TaskStepKind::RunContainer,
    TaskStepKind::WaitForContainerToBecomeHealthy,
    TaskStepKind::RunContainerSetupCommands,
    TaskStepKind::StopContainer,
];

pub(crate) fn handle_pre_run_failure(
    ctx: &mut dyn TaskEventContext,
    event: &TaskEvent,
) -> Result<(), EngineError> {
    warn!(event = %event, "task failed; aborting");
    ctx.abort();

    for kind in PROGRESS_STEPS {
        ctx.remove_pending_steps_of_kind(kind);
    }
    ctx.remove_pending_rules(&|rule: &CleanupRule| rule.is_container_teardown());

    let to_clean_up = containers_to_clean_up(ctx, None);

    let cleanup_disabled = ctx.behaviour_after_failure() == CleanupBehaviour::DontCleanup;
    if cleanup_disabled && !to_clean_up.is_empty() {
        let message = dont_cleanup_message(ctx, event, &to_clean_up);
        ctx.queue_step(TaskStep::DisplayTaskFailure { message });
        return Ok(());
    }

    ctx.queue_step(TaskStep::DisplayTaskFailure {
        message: event.to_string(),
    });

    for (container, docker_container) in to_clean_up {
        ctx.queue_step(TaskStep::CleanUpContainer {
            container,
            docker_container,
        });
    }

    let network_deletion_started = ctx.has_pending_or_processed_step(&|step: &TaskStep| {
        step.kind() == TaskStepKind::DeleteTaskNetwork
    });
    if !network_deletion_started {
        if let Some(rule) = planner::network_rule(ctx.events()) {
            ctx.install_rule(rule);
        }
    }

    Ok(())
}

pub(crate) fn handle_cleanup_failure(
    ctx: &mut dyn TaskEventContext,
    event: &TaskEvent,
) -> Result<(), EngineError> {
    warn!(event = %event, "cleanup failed");

    let was_aborting = ctx.is_aborting();
    ctx.abort();
    let prefix = failure_prefix(ctx, was_aborting)?;

    let details = match event {
        TaskEvent::ContainerStopFailed { .. } => {
            if !was_aborting {
                begin_forced_cleanup(ctx, None);
            }
            None
        }
        TaskEvent::ContainerRemovalFailed { container, .. } => {
            if !was_aborting {
                begin_forced_cleanup(ctx, Some(&container.name));
            }
            Some(abandoned_cleanup_instructions(ctx, container))
        }
        TaskEvent::TaskNetworkDeletionFailed { network, .. } => Some(format!(
            "This network may not have been removed, so you may need to clean up this network \
             yourself by running 'docker network rm {}'.",
            network.id
        )),
        TaskEvent::TemporaryFileDeletionFailed { path, .. } => Some(format!(
            "This file may not have been removed, so you may need to remove this file yourself \
             by running 'rm {}'.",
            path.display()
        )),
        TaskEvent::TemporaryDirectoryDeletionFailed { path, .. } => Some(format!(
            "This directory may not have been removed, so you may need to remove this directory \
             yourself by running 'rm -rf {}'.",
            path.display()
        )),
        _ => return Ok(()),
    };

    let mut message = with_prefix(&prefix, &event.to_string());
    if let Some(details) = details {
        message.push_str("\n\n");
        message.push_str(&details);
    }

    ctx.queue_step(TaskStep::DisplayTaskFailure { message });
    Ok(())
}

/// Replace the orderly stop/remove sequence with forced removal of every
/// container that still exists.
fn begin_forced_cleanup(ctx: &mut dyn TaskEventContext, failed_container: Option<&str>) {
    ctx.remove_pending_steps_of_kind(TaskStepKind::StopContainer);
    ctx.remove_pending_steps_of_kind(TaskStepKind::RemoveContainer);
    ctx.remove_pending_rules(&|rule: &CleanupRule| rule.is_container_teardown());

    for (container, docker_container) in containers_to_clean_up(ctx, failed_container) {
        ctx.queue_step(TaskStep::CleanUpContainer {
            container,
            docker_container,
        });
    }
}

/// Containers that exist and have no removal under way.
fn containers_to_clean_up(
    ctx: &dyn TaskEventContext,
    exclude: Option<&str>,
) -> Vec<(Arc<Container>, DockerContainer)> {
    history::created_containers(ctx.events())
        .into_iter()
        .filter(|(container, _)| Some(container.name.as_str()) != exclude)
        .filter(|(container, _)| !history::has_been_removed(ctx.events(), &container.name))
        .filter(|(container, _)| {
            let name = container.name.as_str();
            !ctx.has_pending_or_processed_step(&|step: &TaskStep| {
                matches!(
                    step,
                    TaskStep::RemoveContainer { .. } | TaskStep::CleanUpContainer { .. }
                ) && step.is_for_container(name)
            })
        })
        .map(|(container, docker_container)| (Arc::clone(container), docker_container.clone()))
        .collect()
}

/// The removal of `container` failed: anything waiting on it can never run,
/// so drop those rules and list the commands to do it all by hand.
fn abandoned_cleanup_instructions(
    ctx: &mut dyn TaskEventContext,
    container: &Arc<Container>,
) -> String {
    let name = container.name.clone();
    let mut abandoned = ctx.remove_pending_rules(&|rule: &CleanupRule| {
        rule.is_network_deletion() || rule.is_temporary_path_for(&name)
    });

    if let Some(docker_container) = history::docker_container(ctx.events(), &name) {
        abandoned.push(CleanupRule::RemoveContainer {
            container: Arc::clone(container),
            docker_container: docker_container.clone(),
            wait_for_stop: false,
        });
    }

    let commands = rules::manual_cleanup_commands(&abandoned);
    let mut instructions = String::from(
        "This container may not have been cleaned up completely, so you may need to remove it \
         yourself.",
    );
    if abandoned.iter().any(CleanupRule::is_network_deletion) {
        instructions.push_str(
            " Furthermore, the task network cannot be automatically cleaned up, so you will need \
             to clean it up yourself.",
        );
    }
    if !commands.is_empty() {
        instructions.push_str("\n\nYou may need to run some or all of the following commands:\n");
        for command in commands {
            instructions.push_str(&format!("\n    {command}"));
        }
    }
    instructions
}

fn failure_prefix(ctx: &dyn TaskEventContext, was_aborting: bool) -> Result<String, EngineError> {
    if was_aborting {
        return Ok("During clean up after the previous failure, ".to_string());
    }

    match ctx.single_past_event_of_kind(TaskEventKind::RunningContainerExited)? {
        Some(TaskEvent::RunningContainerExited { exit_code, .. }) => Ok(format!(
            "After the task exited with exit code {exit_code}, "
        )),
        _ => Ok(String::new()),
    }
}

fn with_prefix(prefix: &str, message: &str) -> String {
    if !prefix.is_empty() {
        return format!("{prefix}{message}");
    }

    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn dont_cleanup_message(
    ctx: &dyn TaskEventContext,
    event: &TaskEvent,
    left_behind: &[(Arc<Container>, DockerContainer)],
) -> String {
    format!(
        "{event}\n\n{}",
        left_behind_message(
            ctx.events(),
            "cleanup after failure",
            "Once you have finished investigating the issue",
            left_behind,
            &[],
        )
    )
}

/// How to inspect and then remove containers that cleanup was told to
/// leave alone. `extra_commands` go between container and network removal.
pub(crate) fn left_behind_message(
    events: &[TaskEvent],
    disabled: &str,
    when_done: &str,
    left_behind: &[(Arc<Container>, DockerContainer)],
    extra_commands: &[String],
) -> String {
    let mut message = format!(
        "As the task was run with {disabled} disabled, the created containers will not be \
         cleaned up.\n"
    );

    for (container, docker_container) in left_behind {
        let running = history::has_started(events, &container.name)
            && !history::has_stopped(events, &container.name);
        message.push_str(&format!(
            "\nFor container '{}', view its output by running 'docker logs {}'",
            container.name, docker_container.id
        ));
        if running {
            message.push_str(&format!(
                ", or run a command in the container with 'docker exec -it {} <command>'",
                docker_container.id
            ));
        }
        message.push('.');
    }

    let mut commands = vec![format!(
        "docker rm --force --volumes {}",
        left_behind
            .iter()
            .map(|(_, docker_container)| docker_container.id.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    )];
    commands.extend(extra_commands.iter().cloned());
    if let Some(network) = history::task_network(events) {
        commands.push(format!("docker network rm {}", network.id));
    }

    message.push_str(&format!(
        "\n\n{when_done}, clean up all containers and the task network by running:\n\n    {}",
        commands.join(" && ")
    ));
    message
}
