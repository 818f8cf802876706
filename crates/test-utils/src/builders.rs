#![allow(dead_code)]

use taskpod::config::{ConfigFile, ContainerConfig, RawConfigFile, TaskConfig};
use taskpod::errors::Result;
use taskpod::model::TaskRunConfiguration;
use taskpod::types::CleanupBehaviour;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_container(mut self, name: &str, container: ContainerConfig) -> Self {
        self.config.container.insert(name.to_string(), container);
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn behaviour_after_failure(mut self, behaviour: CleanupBehaviour) -> Self {
        self.config.config.behaviour_after_failure = behaviour;
        self
    }

    pub fn behaviour_after_success(mut self, behaviour: CleanupBehaviour) -> Self {
        self.config.config.behaviour_after_success = behaviour;
        self
    }

    pub fn max_concurrent_steps(mut self, max: usize) -> Self {
        self.config.config.max_concurrent_steps = Some(max);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ContainerConfig`.
pub struct ContainerConfigBuilder {
    container: ContainerConfig,
}

impl ContainerConfigBuilder {
    /// Container pulling `image`.
    pub fn image(image: &str) -> Self {
        Self {
            container: ContainerConfig {
                image: Some(image.to_string()),
                ..Default::default()
            },
        }
    }

    /// Container built from `dir`.
    pub fn build_directory(dir: &str) -> Self {
        Self {
            container: ContainerConfig {
                build_directory: Some(dir.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn depends_on(mut self, container: &str) -> Self {
        self.container.dependencies.push(container.to_string());
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.container.command = Some(command.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.container
            .environment
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn setup_command(mut self, command: &str) -> Self {
        self.container.setup_commands.push(command.to_string());
        self
    }

    pub fn health_check_interval(mut self, interval: &str) -> Self {
        self.container.health_check.interval = Some(interval.to_string());
        self
    }

    pub fn build(self) -> ContainerConfig {
        self.container
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    /// Task running `container`.
    pub fn run(container: &str) -> Self {
        Self {
            task: TaskConfig {
                run: Some(TaskRunConfiguration {
                    container: container.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    /// Task that only groups prerequisites.
    pub fn group() -> Self {
        Self {
            task: TaskConfig::default(),
        }
    }

    pub fn command(mut self, command: &str) -> Self {
        if let Some(run) = self.task.run.as_mut() {
            run.command = Some(command.to_string());
        }
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        if let Some(run) = self.task.run.as_mut() {
            run.environment.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn dependency(mut self, container: &str) -> Self {
        self.task.dependencies.push(container.to_string());
        self
    }

    pub fn prerequisite(mut self, task: &str) -> Self {
        self.task.prerequisites.push(task.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.task.description = Some(description.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
