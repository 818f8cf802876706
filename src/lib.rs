// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod rules;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::execution_order;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::DependencyGraph;
use crate::engine::{CancellationSource, TaskRunOptions, default_max_concurrent_steps, run_task};
use crate::exec::{DockerCliEngine, EventLogger, TaskStepRunner, TracingEventLogger};
use crate::types::CleanupBehaviour;

/// High-level entry point used by `main.rs`.
///
/// Loads the config, resolves which tasks to run, and runs them one after
/// another. Returns the process exit code: the first non-zero task exit
/// code, or 0.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from '{}'", args.config.display()))?;

    if args.list_tasks {
        print_task_list(&cfg);
        return Ok(0);
    }

    let task = args
        .task
        .as_deref()
        .ok_or_else(|| anyhow!("no task given; use --list-tasks to see the available tasks"))?;

    let order = if args.skip_prerequisites {
        if !cfg.task.contains_key(task) {
            return Err(errors::TaskpodError::TaskNotFound(task.to_string()).into());
        }
        vec![task.to_string()]
    } else {
        execution_order(&cfg, task)?
    };
    info!(task = %task, order = ?order, "resolved task execution order");

    if args.dry_run {
        print_dry_run(&cfg, &order)?;
        return Ok(0);
    }

    let options = TaskRunOptions {
        behaviour_after_failure: if args.no_cleanup || args.no_cleanup_after_failure {
            CleanupBehaviour::DontCleanup
        } else {
            cfg.config.behaviour_after_failure
        },
        behaviour_after_success: if args.no_cleanup || args.no_cleanup_after_success {
            CleanupBehaviour::DontCleanup
        } else {
            cfg.config.behaviour_after_success
        },
        max_concurrent_steps: args
            .max_concurrent_steps
            .map(usize::from)
            .or(cfg.config.max_concurrent_steps)
            .unwrap_or_else(default_max_concurrent_steps),
    };
    let project = project_name(&cfg, &args.config);
    let logger: Arc<dyn EventLogger> = Arc::new(TracingEventLogger);

    for name in &order {
        let task_cfg = cfg
            .task
            .get(name)
            .ok_or_else(|| errors::TaskpodError::TaskNotFound(name.clone()))?;

        if task_cfg.run.is_none() {
            debug!(task = %name, "task only groups prerequisites; nothing to run");
            continue;
        }

        let graph = Arc::new(DependencyGraph::from_config(&cfg, name)?);
        let engine = Arc::new(DockerCliEngine::new(project.as_str(), name.as_str()));
        let runner = Arc::new(TaskStepRunner::new(engine, Arc::clone(&logger)));

        info!(task = %name, containers = graph.nodes().count(), "running task");
        let exit_code = run_task(
            graph,
            runner,
            Arc::clone(&logger),
            options,
            CancellationSource::ctrl_c(),
        )
        .await
        .with_context(|| format!("running task '{name}'"))?;

        if exit_code != 0 {
            warn!(task = %name, exit_code, "task did not succeed; stopping");
            return Ok(i32::try_from(exit_code).unwrap_or(1));
        }
        info!(task = %name, "task succeeded");
    }

    Ok(0)
}

/// Name used as a prefix for built images and task networks.
///
/// `[config] project_name`, else the config file's directory name.
fn project_name(cfg: &ConfigFile, config_path: &Path) -> String {
    let raw = cfg.config.project_name.clone().or_else(|| {
        std::fs::canonicalize(config_path)
            .ok()
            .and_then(|p| p.parent()?.file_name()?.to_str().map(str::to_string))
    });

    let sanitized: String = raw
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');

    if trimmed.is_empty() {
        "taskpod".to_string()
    } else {
        trimmed.to_string()
    }
}

fn print_task_list(cfg: &ConfigFile) {
    println!("Available tasks:");
    for (name, task) in cfg.task.iter() {
        match &task.description {
            Some(description) => println!("  - {name}: {description}"),
            None => println!("  - {name}"),
        }
    }
}

/// Print the tasks that would run and each one's container startup order.
fn print_dry_run(cfg: &ConfigFile, order: &[String]) -> Result<()> {
    println!("taskpod dry-run");
    println!(
        "  config.behaviour_after_failure = {:?}",
        cfg.config.behaviour_after_failure
    );
    println!(
        "  config.behaviour_after_success = {:?}",
        cfg.config.behaviour_after_success
    );
    if let Some(max) = cfg.config.max_concurrent_steps {
        println!("  config.max_concurrent_steps = {max}");
    }
    println!();

    for name in order {
        println!("task {name}:");
        let Some(task) = cfg.task.get(name) else {
            continue;
        };
        let Some(run) = &task.run else {
            println!("  (prerequisites only)");
            continue;
        };

        let graph = DependencyGraph::from_config(cfg, name)?;
        println!("  container: {}", run.container);
        if let Some(command) = &run.command {
            println!("  command: {command}");
        }
        println!("  startup order: {}", graph.startup_order().join(" -> "));
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
