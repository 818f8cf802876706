// src/config/model.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::model::{Container, TaskRunConfiguration};
use crate::types::CleanupBehaviour;

/// Raw configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// behaviour_after_failure = "cleanup"
/// behaviour_after_success = "cleanup"
/// max_concurrent_steps = 4
///
/// [container.db]
/// image = "postgres:16"
/// setup_commands = ["./seed.sh"]
///
/// [container.db.health_check]
/// interval = "2s"
/// retries = 10
///
/// [container.app]
/// build_directory = "./app"
/// dependencies = ["db"]
///
/// [task.test]
/// prerequisites = ["lint"]
/// run = { container = "app", command = "cargo test" }
/// ```
///
/// Use [`ConfigFile::try_from`] to get a validated [`ConfigFile`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All containers from `[container.<name>]`.
    #[serde(default)]
    pub container: BTreeMap<String, ContainerConfig>,

    /// All tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// Containers are resolved into shared [`Container`] values; tasks keep
/// their raw shape since they are only read when resolving run order and
/// building a dependency graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub container: BTreeMap<String, Arc<Container>>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    /// Assemble a config without running validation.
    ///
    /// Only `config::validate` should call this.
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        container: BTreeMap<String, Arc<Container>>,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            config,
            container,
            task,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// `"cleanup"` (default) or `"dont-cleanup"`.
    #[serde(default)]
    pub behaviour_after_failure: CleanupBehaviour,

    /// Same choice for a task that ran to completion, whatever its exit
    /// code.
    #[serde(default)]
    pub behaviour_after_success: CleanupBehaviour,

    /// Upper bound on steps executing at once.
    ///
    /// If unset, the host's available parallelism is used.
    #[serde(default)]
    pub max_concurrent_steps: Option<usize>,

    /// Prefix used when naming built images and the task network.
    #[serde(default)]
    pub project_name: Option<String>,
}

/// `[container.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    /// Image to pull. Mutually exclusive with `build_directory`.
    #[serde(default)]
    pub image: Option<String>,

    /// Directory to build the image from. Mutually exclusive with `image`.
    #[serde(default)]
    pub build_directory: Option<String>,

    /// Dockerfile name relative to `build_directory`.
    #[serde(default)]
    pub dockerfile: Option<String>,

    /// Other containers that must be healthy before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    /// `local:container[:options]` entries.
    #[serde(default)]
    pub volumes: Vec<String>,

    /// `local:container` entries.
    #[serde(default)]
    pub ports: Vec<String>,

    #[serde(default)]
    pub health_check: HealthCheckSection,

    /// Commands run with `docker exec` once the container is healthy.
    ///
    /// Dependents only start after all of them succeed.
    #[serde(default)]
    pub setup_commands: Vec<String>,
}

/// `[container.<name>.health_check]` section.
///
/// Durations use the `"500ms"`, `"3s"`, `"1m"` format.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthCheckSection {
    #[serde(default)]
    pub interval: Option<String>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub start_period: Option<String>,

    #[serde(default)]
    pub command: Option<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// The container to run. Tasks without one only group prerequisites.
    #[serde(default)]
    pub run: Option<TaskRunConfiguration>,

    /// Extra containers started alongside the task container.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Tasks that must finish successfully before this one runs.
    ///
    /// Entries may contain `*` wildcards, e.g. `"lint:*"`.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}
