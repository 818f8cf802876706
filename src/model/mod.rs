// src/model/mod.rs

//! Task execution model: containers, steps, events and the transitions
//! between them.
//!
//! - [`container`]: resolved container definitions and Docker identifiers.
//! - [`steps`]: the closed set of side effects (`TaskStep`).
//! - [`events`]: the closed set of outcomes (`TaskEvent`).
//! - [`apply`] / [`failure`]: what each event queues next.
//! - [`history`]: queries over the event log.
//! - [`context`]: the view of the state machine events are applied against.

pub mod apply;
pub mod container;
pub mod context;
pub mod events;
pub mod failure;
pub mod history;
pub mod steps;

pub use container::{
    Container, DockerContainer, DockerImage, DockerNetwork, HealthCheckConfig, ImageSource,
    PortMapping, TaskRunConfiguration, VolumeMount,
};
pub use context::TaskEventContext;
pub use events::{TaskEvent, TaskEventKind};
pub use steps::{TaskStep, TaskStepKind};
