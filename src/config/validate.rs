// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, ContainerConfig, RawConfigFile, TaskConfig};
use crate::config::order::{expand_prerequisites, resolve_execution_order};
use crate::errors::{Result, TaskpodError};
use crate::model::{Container, HealthCheckConfig, ImageSource, PortMapping, VolumeMount};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TaskpodError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let containers = resolve_containers(&raw.container)?;
        Ok(ConfigFile::new_unchecked(raw.config, containers, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_tasks(cfg)?;
    validate_prerequisite_graph(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TaskpodError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_concurrent_steps == Some(0) {
        return Err(TaskpodError::ConfigError(
            "[config].max_concurrent_steps must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        match &task.run {
            Some(run) if run.container.trim().is_empty() => {
                return Err(TaskpodError::ConfigError(format!(
                    "task '{name}' has an empty `run.container`"
                )));
            }
            None if task.prerequisites.is_empty() => {
                return Err(TaskpodError::ConfigError(format!(
                    "task '{name}' must have a `run` section or at least one prerequisite"
                )));
            }
            None if !task.dependencies.is_empty() => {
                return Err(TaskpodError::ConfigError(format!(
                    "task '{name}' lists `dependencies` but has no `run` section to start them for"
                )));
            }
            _ => {}
        }

        // Unknown and self-referencing prerequisites are reported here.
        expand_prerequisites(&cfg.task, name)?;
    }
    Ok(())
}

fn validate_prerequisite_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: prerequisite -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    let mut expanded: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for name in cfg.task.keys() {
        expanded.insert(name.as_str(), expand_prerequisites(&cfg.task, name)?);
    }

    for (name, prerequisites) in expanded.iter() {
        for prerequisite in prerequisites {
            if let Some((key, _)) = cfg.task.get_key_value(prerequisite) {
                graph.add_edge(key.as_str(), *name, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            // Walking the prerequisites from the offending task reproduces the
            // cycle with a readable chain.
            match resolve_execution_order(&cfg.task, node) {
                Err(err) => Err(err),
                Ok(_) => Err(TaskpodError::PrerequisiteCycle(format!(
                    "There is a dependency cycle between tasks involving task '{node}'."
                ))),
            }
        }
    }
}

fn resolve_containers(
    raw: &BTreeMap<String, ContainerConfig>,
) -> Result<BTreeMap<String, Arc<Container>>> {
    raw.iter()
        .map(|(name, cfg)| Ok((name.clone(), Arc::new(resolve_container(name, cfg)?))))
        .collect()
}

fn resolve_container(name: &str, cfg: &ContainerConfig) -> Result<Container> {
    let invalid = |msg: String| TaskpodError::ConfigError(format!("container '{name}': {msg}"));

    let image_source = match (&cfg.image, &cfg.build_directory) {
        (Some(image), None) if !image.trim().is_empty() => ImageSource::Pull {
            image_name: image.trim().to_string(),
        },
        (None, Some(dir)) if !dir.trim().is_empty() => ImageSource::Build {
            build_directory: PathBuf::from(dir.trim()),
            dockerfile: cfg.dockerfile.clone(),
        },
        (Some(_), Some(_)) => {
            return Err(invalid(
                "only one of `image` or `build_directory` may be given".to_string(),
            ));
        }
        _ => {
            return Err(invalid(
                "exactly one of `image` or `build_directory` must be given".to_string(),
            ));
        }
    };

    if cfg.dockerfile.is_some() && cfg.build_directory.is_none() {
        return Err(invalid("`dockerfile` requires `build_directory`".to_string()));
    }

    let volume_mounts = cfg
        .volumes
        .iter()
        .map(|v| v.parse::<VolumeMount>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(invalid)?;

    let port_mappings = cfg
        .ports
        .iter()
        .map(|p| p.parse::<PortMapping>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(invalid)?;

    let health_check = HealthCheckConfig {
        interval: parse_optional_duration(cfg.health_check.interval.as_deref())
            .map_err(|e| invalid(format!("health_check.interval: {e}")))?,
        retries: cfg.health_check.retries,
        start_period: parse_optional_duration(cfg.health_check.start_period.as_deref())
            .map_err(|e| invalid(format!("health_check.start_period: {e}")))?,
        command: cfg.health_check.command.clone(),
    };

    if let Some(empty) = cfg.setup_commands.iter().find(|c| c.trim().is_empty()) {
        return Err(invalid(format!("setup command {empty:?} is empty")));
    }

    Ok(Container {
        name: name.to_string(),
        image_source,
        dependencies: cfg.dependencies.iter().cloned().collect::<BTreeSet<_>>(),
        command: cfg.command.clone(),
        environment: cfg.environment.clone(),
        working_directory: cfg.working_directory.clone(),
        volume_mounts,
        port_mappings,
        health_check,
        setup_commands: cfg.setup_commands.clone(),
    })
}

fn parse_optional_duration(s: Option<&str>) -> std::result::Result<Option<Duration>, String> {
    s.map(parse_duration).transpose()
}

/// Parse `"500ms"`, `"3s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    let seconds_per_unit = match unit_part.trim().to_lowercase().as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        unit => {
            return Err(format!("unsupported duration unit '{unit}'; expected ms, s, m, or h"));
        }
    };

    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
