// src/rules/mod.rs

//! Cleanup rules: "queue this teardown step once these things have
//! happened".
//!
//! Rules are installed by events (see `model::apply`) and evaluated by the
//! state machine after every posted event. Evaluation is stateless; a rule
//! that becomes ready fires once and is retired.

pub mod planner;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::model::history;
use crate::model::{Container, DockerContainer, DockerNetwork, TaskEvent, TaskStep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupRule {
    /// Stop a dependency once every started container that needs it has
    /// stopped (or, for the task container, exited).
    StopContainer {
        container: Arc<Container>,
        docker_container: DockerContainer,
        dependents: BTreeSet<String>,
    },
    /// Remove a container, after it has stopped if it was ever started.
    RemoveContainer {
        container: Arc<Container>,
        docker_container: DockerContainer,
        wait_for_stop: bool,
    },
    /// Delete the network once no created container is left on it.
    DeleteTaskNetwork { network: DockerNetwork },
    /// Delete a temporary file once the container using it is gone.
    DeleteTemporaryFile { container_name: String, path: PathBuf },
    DeleteTemporaryDirectory { container_name: String, path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEvaluation {
    Ready(TaskStep),
    NotReady,
}

/// Order in which manual cleanup commands are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ManualCleanupSortOrder {
    RemoveContainers,
    DeleteTemporaryFiles,
    DeleteTaskNetwork,
}

impl CleanupRule {
    pub fn evaluate(&self, events: &[TaskEvent], processed_steps: &[TaskStep]) -> RuleEvaluation {
        let ready = match self {
            CleanupRule::StopContainer { dependents, .. } => dependents.iter().all(|dependent| {
                !history::has_started(events, dependent) || history::has_stopped(events, dependent)
            }),
            CleanupRule::RemoveContainer {
                container,
                wait_for_stop,
                ..
            } => !wait_for_stop || history::has_stopped(events, &container.name),
            CleanupRule::DeleteTaskNetwork { .. } => processed_steps
                .iter()
                .filter_map(|step| match step {
                    TaskStep::CreateContainer { container, .. } => Some(container.name.as_str()),
                    _ => None,
                })
                .all(|name| {
                    history::has_been_removed(events, name)
                        || history::creation_failed(events, name)
                }),
            CleanupRule::DeleteTemporaryFile { container_name, .. }
            | CleanupRule::DeleteTemporaryDirectory { container_name, .. } => {
                history::has_been_removed(events, container_name)
            }
        };

        if ready {
            RuleEvaluation::Ready(self.step())
        } else {
            RuleEvaluation::NotReady
        }
    }

    /// The step this rule queues when it fires.
    pub fn step(&self) -> TaskStep {
        match self {
            CleanupRule::StopContainer {
                container,
                docker_container,
                ..
            } => TaskStep::StopContainer {
                container: Arc::clone(container),
                docker_container: docker_container.clone(),
            },
            CleanupRule::RemoveContainer {
                container,
                docker_container,
                ..
            } => TaskStep::RemoveContainer {
                container: Arc::clone(container),
                docker_container: docker_container.clone(),
            },
            CleanupRule::DeleteTaskNetwork { network } => TaskStep::DeleteTaskNetwork {
                network: network.clone(),
            },
            CleanupRule::DeleteTemporaryFile { path, .. } => {
                TaskStep::DeleteTemporaryFile { path: path.clone() }
            }
            CleanupRule::DeleteTemporaryDirectory { path, .. } => {
                TaskStep::DeleteTemporaryDirectory { path: path.clone() }
            }
        }
    }

    /// Shell command a user can run to do this cleanup by hand.
    ///
    /// Stopping has none: removal with `--force` covers it.
    pub fn manual_cleanup_command(&self) -> Option<String> {
        match self {
            CleanupRule::StopContainer { .. } => None,
            CleanupRule::RemoveContainer {
                docker_container, ..
            } => Some(format!("docker rm --force --volumes {}", docker_container.id)),
            CleanupRule::DeleteTaskNetwork { network } => {
                Some(format!("docker network rm {}", network.id))
            }
            CleanupRule::DeleteTemporaryFile { path, .. } => Some(format!("rm {}", path.display())),
            CleanupRule::DeleteTemporaryDirectory { path, .. } => {
                Some(format!("rm -rf {}", path.display()))
            }
        }
    }

    pub fn manual_cleanup_sort_order(&self) -> Option<ManualCleanupSortOrder> {
        match self {
            CleanupRule::StopContainer { .. } => None,
            CleanupRule::RemoveContainer { .. } => Some(ManualCleanupSortOrder::RemoveContainers),
            CleanupRule::DeleteTemporaryFile { .. }
            | CleanupRule::DeleteTemporaryDirectory { .. } => {
                Some(ManualCleanupSortOrder::DeleteTemporaryFiles)
            }
            CleanupRule::DeleteTaskNetwork { .. } => {
                Some(ManualCleanupSortOrder::DeleteTaskNetwork)
            }
        }
    }

    /// Stop and remove rules, which a forced cleanup replaces.
    pub fn is_container_teardown(&self) -> bool {
        matches!(
            self,
            CleanupRule::StopContainer { .. } | CleanupRule::RemoveContainer { .. }
        )
    }

    pub fn is_network_deletion(&self) -> bool {
        matches!(self, CleanupRule::DeleteTaskNetwork { .. })
    }

    pub fn is_temporary_path(&self) -> bool {
        matches!(
            self,
            CleanupRule::DeleteTemporaryFile { .. } | CleanupRule::DeleteTemporaryDirectory { .. }
        )
    }

    /// Temporary file or directory rule waiting on `container_name`.
    pub fn is_temporary_path_for(&self, name: &str) -> bool {
        match self {
            CleanupRule::DeleteTemporaryFile { container_name, .. }
            | CleanupRule::DeleteTemporaryDirectory { container_name, .. } => {
                container_name == name
            }
            _ => false,
        }
    }
}

/// Manual commands for `rules`, containers first and the network last.
pub fn manual_cleanup_commands(rules: &[CleanupRule]) -> Vec<String> {
    let mut ordered: Vec<(ManualCleanupSortOrder, String)> = rules
        .iter()
        .filter_map(|rule| {
            Some((
                rule.manual_cleanup_sort_order()?,
                rule.manual_cleanup_command()?,
            ))
        })
        .collect();

    ordered.sort_by_key(|(order, _)| *order);
    ordered.into_iter().map(|(_, command)| command).collect()
}
