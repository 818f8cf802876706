// src/rules/planner.rs

//! Derives which cleanup rules to install from the graph and the events
//! seen so far.

use std::sync::Arc;

use crate::dag::DependencyGraph;
use crate::errors::EngineError;
use crate::model::{TaskEvent, history};
use crate::rules::CleanupRule;

/// Teardown after the task container exited normally.
///
/// Every created container is removed; started dependencies are stopped
/// first, each only once the containers depending on it have stopped. The
/// network goes last.
pub fn post_run_rules(
    graph: &DependencyGraph,
    events: &[TaskEvent],
) -> Result<Vec<CleanupRule>, EngineError> {
    let mut rules = Vec::new();

    for (container, docker_container) in history::created_containers(events) {
        let node = graph.node_for(&container.name)?;
        let started = history::has_started(events, &container.name);

        if started && !node.is_root_node() {
            rules.push(CleanupRule::StopContainer {
                container: Arc::clone(container),
                docker_container: docker_container.clone(),
                dependents: node.depended_on_by().clone(),
            });
        }

        rules.push(CleanupRule::RemoveContainer {
            container: Arc::clone(container),
            docker_container: docker_container.clone(),
            wait_for_stop: started,
        });
    }

    rules.extend(network_rule(events));
    Ok(rules)
}

/// Network deletion, if a network was created.
pub fn network_rule(events: &[TaskEvent]) -> Option<CleanupRule> {
    history::task_network(events).map(|network| CleanupRule::DeleteTaskNetwork {
        network: network.clone(),
    })
}

/// Deletion rule for a `TemporaryFileCreated` / `TemporaryDirectoryCreated`
/// event.
pub fn temporary_path_rule(event: &TaskEvent) -> Option<CleanupRule> {
    match event {
        TaskEvent::TemporaryFileCreated { container, path } => {
            Some(CleanupRule::DeleteTemporaryFile {
                container_name: container.name.clone(),
                path: path.clone(),
            })
        }
        TaskEvent::TemporaryDirectoryCreated { container, path } => {
            Some(CleanupRule::DeleteTemporaryDirectory {
                container_name: container.name.clone(),
                path: path.clone(),
            })
        }
        _ => None,
    }
}
