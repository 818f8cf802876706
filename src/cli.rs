// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskpod`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskpod",
    version,
    about = "Run tasks in containers, with their dependencies started alongside.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(
        long,
        short = 'f',
        value_name = "PATH",
        default_value_os_t = crate::config::default_config_path()
    )]
    pub config: PathBuf,

    /// Task to run. Its prerequisites run first.
    #[arg(value_name = "TASK", required_unless_present = "list_tasks")]
    pub task: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKPOD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Maximum number of steps (image pulls, container starts, ...) to run at
    /// once. Overrides `max_concurrent_steps` in the config.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrent_steps: Option<u16>,

    /// Leave containers and the network behind if the task fails, so they
    /// can be inspected.
    #[arg(long)]
    pub no_cleanup_after_failure: bool,

    /// Leave containers and the network behind once the task has run, so
    /// they can be used afterwards.
    #[arg(long)]
    pub no_cleanup_after_success: bool,

    /// Shorthand for both `--no-cleanup-after-failure` and
    /// `--no-cleanup-after-success`.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Run only the named task, not its prerequisites.
    #[arg(long)]
    pub skip_prerequisites: bool,

    /// Parse + validate, print what would run, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,

    /// List the tasks defined in the config and exit.
    #[arg(long)]
    pub list_tasks: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
