// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`backend`] defines the `ContainerEngine` trait the runner calls into,
//!   so tests can swap in a fake engine.
//! - [`docker_cli`] is the production engine, driving the `docker` client
//!   with `tokio::process::Command`.
//! - [`step_runner`] maps each `TaskStep` to engine calls and the resulting
//!   `TaskEvent`s.
//! - [`event_logger`] reports progress and failures to the user.

pub mod backend;
pub mod docker_cli;
pub mod event_logger;
pub mod step_runner;

pub use backend::{
    CommandOutput, ContainerEngine, CreateContainerRequest, CreatedContainer, EngineFailure,
    EngineFuture, HealthStatus,
};
pub use docker_cli::DockerCliEngine;
pub use event_logger::{EventLogger, TracingEventLogger};
pub use step_runner::{StepFuture, StepRunner, TaskStepRunner};
