// src/exec/backend.rs

//! Pluggable container engine abstraction.
//!
//! The step runner talks to a `ContainerEngine` instead of shelling out
//! directly. Production code uses [`DockerCliEngine`](super::DockerCliEngine);
//! tests provide a scripted fake that records calls and never touches
//! Docker.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::model::{Container, DockerContainer, DockerImage, DockerNetwork};

/// Boxed future returned by every [`ContainerEngine`] method.
pub type EngineFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EngineFailure>> + Send + 'a>>;

/// A Docker operation that did not succeed.
///
/// The message is shown to the user as part of the failure event, so it
/// should read as the tail of a sentence: "Could not start container 'db':
/// <message>".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineFailure {
    pub message: String,
}

impl EngineFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for EngineFailure {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContainerRequest {
    pub container: Arc<Container>,
    pub command: Option<String>,
    pub additional_environment: BTreeMap<String, String>,
    pub image: DockerImage,
    pub network: DockerNetwork,
}

/// Result of creating a container.
///
/// Temporary paths are owned by the task and removed once the container is
/// gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    pub docker_container: DockerContainer,
    pub temporary_files: Vec<PathBuf>,
    pub temporary_directories: Vec<PathBuf>,
}

impl CreatedContainer {
    pub fn new(docker_container: DockerContainer) -> Self {
        Self {
            docker_container,
            temporary_files: Vec::new(),
            temporary_directories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The image defines no health check; started counts as healthy.
    NoHealthCheck,
    BecameHealthy,
    BecameUnhealthy { last_output: String },
    Exited { exit_code: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i64,
    pub output: String,
}

/// Side effects against a container runtime.
///
/// Implementations own timeouts, retries and the translation of low-level
/// errors into [`EngineFailure`] messages.
pub trait ContainerEngine: Send + Sync + 'static {
    fn build_image<'a>(&'a self, container: &'a Container) -> EngineFuture<'a, DockerImage>;

    fn pull_image<'a>(&'a self, image_name: &'a str) -> EngineFuture<'a, DockerImage>;

    fn create_network(&self) -> EngineFuture<'_, DockerNetwork>;

    fn create_container<'a>(
        &'a self,
        request: &'a CreateContainerRequest,
    ) -> EngineFuture<'a, CreatedContainer>;

    fn start_container<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, ()>;

    /// Start the task container attached and wait for it to exit.
    fn run_container<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, i64>;

    fn wait_for_health<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, HealthStatus>;

    fn run_setup_command<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
        command: &'a str,
    ) -> EngineFuture<'a, CommandOutput>;

    fn stop_container<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, ()>;

    /// Remove a container; `force` also stops it first.
    fn remove_container<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
        force: bool,
    ) -> EngineFuture<'a, ()>;

    fn delete_network<'a>(&'a self, network: &'a DockerNetwork) -> EngineFuture<'a, ()>;
}
