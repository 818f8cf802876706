// src/model/container.rs

//! Resolved, immutable description of the containers a task uses.
//!
//! These are produced from the raw TOML by `config::validate` and shared
//! (behind `Arc`) between the dependency graph, the steps and the events.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// A container definition from `[container.<name>]`.
///
/// Identity is the name: two containers with the same name are the same
/// container within one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Container {
    pub name: String,
    pub image_source: ImageSource,
    pub dependencies: BTreeSet<String>,
    pub command: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub port_mappings: Vec<PortMapping>,
    pub health_check: HealthCheckConfig,
    pub setup_commands: Vec<String>,
}

impl Container {
    /// Minimal container pulling `image`, mostly useful for tests and builders.
    pub fn from_image(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_source: ImageSource::Pull {
                image_name: image.into(),
            },
            dependencies: BTreeSet::new(),
            command: None,
            environment: BTreeMap::new(),
            working_directory: None,
            volume_mounts: Vec::new(),
            port_mappings: Vec::new(),
            health_check: HealthCheckConfig::default(),
            setup_commands: Vec::new(),
        }
    }

    pub fn has_setup_commands(&self) -> bool {
        !self.setup_commands.is_empty()
    }
}

/// Where the image for a container comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    Build {
        build_directory: PathBuf,
        dockerfile: Option<String>,
    },
    Pull {
        image_name: String,
    },
}

/// Health check overrides applied when the container is created.
///
/// Any field left as `None` falls back to the image's own `HEALTHCHECK`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HealthCheckConfig {
    pub interval: Option<Duration>,
    pub retries: Option<u32>,
    pub start_period: Option<Duration>,
    pub command: Option<String>,
}

/// `local:container[:options]` volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeMount {
    pub local_path: String,
    pub container_path: String,
    pub options: Option<String>,
}

impl FromStr for VolumeMount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [local, container] if !local.is_empty() && !container.is_empty() => Ok(Self {
                local_path: local.to_string(),
                container_path: container.to_string(),
                options: None,
            }),
            [local, container, options]
                if !local.is_empty() && !container.is_empty() && !options.is_empty() =>
            {
                Ok(Self {
                    local_path: local.to_string(),
                    container_path: container.to_string(),
                    options: Some(options.to_string()),
                })
            }
            _ => Err(format!(
                "invalid volume mount '{s}' (expected local:container or local:container:options)"
            )),
        }
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local_path, self.container_path)?;
        if let Some(options) = &self.options {
            write!(f, ":{options}")?;
        }
        Ok(())
    }
}

/// `local:container` port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    pub local_port: u16,
    pub container_port: u16,
}

impl FromStr for PortMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, container) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid port mapping '{s}' (expected local:container)"))?;

        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| format!("invalid port '{part}' in port mapping '{s}'"))
        };

        Ok(Self {
            local_port: parse(local)?,
            container_port: parse(container)?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local_port, self.container_port)
    }
}

/// `[task.<name>.run]`: which container the task runs and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskRunConfiguration {
    pub container: String,

    /// Overrides the container's own `command` for the task container.
    #[serde(default)]
    pub command: Option<String>,

    /// Extra environment variables for the task container only.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Image produced by a build or pull.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DockerImage {
    pub id: String,
}

/// Per-task network all containers are attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DockerNetwork {
    pub id: String,
}

/// A created container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DockerContainer {
    pub id: String,
}
