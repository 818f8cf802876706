// src/model/history.rs

//! Read-only questions about what has happened so far, answered from the
//! event log.

use std::sync::Arc;

use crate::model::container::{Container, DockerContainer, DockerImage, DockerNetwork, ImageSource};
use crate::model::events::TaskEvent;

pub fn task_network(events: &[TaskEvent]) -> Option<&DockerNetwork> {
    events.iter().find_map(|event| match event {
        TaskEvent::TaskNetworkCreated { network } => Some(network),
        _ => None,
    })
}

/// The image for `container`, once it has been built or pulled.
pub fn image_for<'a>(events: &'a [TaskEvent], container: &Container) -> Option<&'a DockerImage> {
    match &container.image_source {
        ImageSource::Build { .. } => events.iter().find_map(|event| match event {
            TaskEvent::ImageBuilt {
                container: built,
                image,
            } if built.name == container.name => Some(image),
            _ => None,
        }),
        ImageSource::Pull { image_name } => events.iter().find_map(|event| match event {
            TaskEvent::ImagePulled {
                image_name: pulled,
                image,
            } if pulled == image_name => Some(image),
            _ => None,
        }),
    }
}

pub fn docker_container<'a>(events: &'a [TaskEvent], name: &str) -> Option<&'a DockerContainer> {
    events.iter().find_map(|event| match event {
        TaskEvent::ContainerCreated {
            container,
            docker_container,
        } if container.name == name => Some(docker_container),
        _ => None,
    })
}

/// Every container created so far, in creation order.
pub fn created_containers(events: &[TaskEvent]) -> Vec<(&Arc<Container>, &DockerContainer)> {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::ContainerCreated {
                container,
                docker_container,
            } => Some((container, docker_container)),
            _ => None,
        })
        .collect()
}

/// Started as a dependency, or run (and exited) as the task container.
pub fn has_started(events: &[TaskEvent], name: &str) -> bool {
    events.iter().any(|event| {
        matches!(
            event,
            TaskEvent::ContainerStarted { .. } | TaskEvent::RunningContainerExited { .. }
        ) && event.is_for_container(name)
    })
}

/// Stopped as a dependency, or exited as the task container.
pub fn has_stopped(events: &[TaskEvent], name: &str) -> bool {
    events.iter().any(|event| {
        matches!(
            event,
            TaskEvent::ContainerStopped { .. } | TaskEvent::RunningContainerExited { .. }
        ) && event.is_for_container(name)
    })
}

pub fn has_been_removed(events: &[TaskEvent], name: &str) -> bool {
    events.iter().any(|event| {
        matches!(event, TaskEvent::ContainerRemoved { .. }) && event.is_for_container(name)
    })
}

pub fn creation_failed(events: &[TaskEvent], name: &str) -> bool {
    events.iter().any(|event| {
        matches!(event, TaskEvent::ContainerCreationFailed { .. }) && event.is_for_container(name)
    })
}

/// Healthy, and done with its setup commands if it has any.
///
/// Dependents may start once all of their dependencies are ready.
pub fn is_ready(events: &[TaskEvent], container: &Container) -> bool {
    let healthy = events.iter().any(|event| {
        matches!(event, TaskEvent::ContainerBecameHealthy { .. })
            && event.is_for_container(&container.name)
    });

    if !healthy || !container.has_setup_commands() {
        return healthy;
    }

    events.iter().any(|event| {
        matches!(event, TaskEvent::ContainerSetupCommandsCompleted { .. })
            && event.is_for_container(&container.name)
    })
}
