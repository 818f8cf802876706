use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskpod::exec::{
    CommandOutput, ContainerEngine, CreateContainerRequest, CreatedContainer, EngineFailure,
    EngineFuture, EventLogger, HealthStatus,
};
use taskpod::model::{Container, DockerContainer, DockerImage, DockerNetwork, TaskEvent, TaskStep};

pub const FAKE_NETWORK_ID: &str = "fake-network";

/// Engine operations, used to script failures and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOperation {
    BuildImage,
    PullImage,
    CreateNetwork,
    CreateContainer,
    StartContainer,
    RunContainer,
    WaitForHealth,
    RunSetupCommand,
    StopContainer,
    RemoveContainer,
    DeleteNetwork,
}

/// One recorded engine call. `target` is the container name, the image
/// name for pulls, or the network id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub operation: FakeOperation,
    pub target: String,
}

/// A `ContainerEngine` that never touches Docker.
///
/// - Docker ids equal container names, so assertions stay readable.
/// - Every call is recorded in order.
/// - Failures, health results and the task exit code can be scripted.
/// - An optional per-call delay plus in-flight tracking lets tests check
///   the concurrency bound.
#[derive(Default)]
pub struct FakeContainerEngine {
    calls: Mutex<Vec<FakeCall>>,
    failures: HashMap<(FakeOperation, String), String>,
    health: HashMap<String, HealthStatus>,
    temporary_files: HashMap<String, PathBuf>,
    exit_code: i64,
    delay: Option<Duration>,
    run_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` on `target` fail with `message`.
    pub fn fail(mut self, operation: FakeOperation, target: &str, message: &str) -> Self {
        self.failures
            .insert((operation, target.to_string()), message.to_string());
        self
    }

    pub fn health(mut self, container: &str, status: HealthStatus) -> Self {
        self.health.insert(container.to_string(), status);
        self
    }

    /// Report `path` as a temporary file created for `container`.
    pub fn temporary_file(mut self, container: &str, path: PathBuf) -> Self {
        self.temporary_files.insert(container.to_string(), path);
        self
    }

    pub fn exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    /// Delay every call by `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay only `run_container`, e.g. to interrupt a running task.
    pub fn run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Targets of every call to `operation`, in call order.
    pub fn targets(&self, operation: FakeOperation) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.target)
            .collect()
    }

    pub fn was_called(&self, operation: FakeOperation, target: &str) -> bool {
        self.targets(operation).iter().any(|t| t == target)
    }

    /// Position of a call in the log, for ordering assertions.
    pub fn position(&self, operation: FakeOperation, target: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.operation == operation && c.target == target)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn call(&self, operation: FakeOperation, target: &str) -> Result<(), EngineFailure> {
        self.calls.lock().unwrap().push(FakeCall {
            operation,
            target: target.to_string(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = match operation {
            FakeOperation::RunContainer => self.run_delay.or(self.delay),
            _ => self.delay,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.get(&(operation, target.to_string())) {
            Some(message) => Err(EngineFailure::new(message.clone())),
            None => Ok(()),
        }
    }
}

impl ContainerEngine for FakeContainerEngine {
    fn build_image<'a>(&'a self, container: &'a Container) -> EngineFuture<'a, DockerImage> {
        Box::pin(async move {
            self.call(FakeOperation::BuildImage, &container.name).await?;
            Ok(DockerImage {
                id: format!("built-{}", container.name),
            })
        })
    }

    fn pull_image<'a>(&'a self, image_name: &'a str) -> EngineFuture<'a, DockerImage> {
        Box::pin(async move {
            self.call(FakeOperation::PullImage, image_name).await?;
            Ok(DockerImage {
                id: image_name.to_string(),
            })
        })
    }

    fn create_network(&self) -> EngineFuture<'_, DockerNetwork> {
        Box::pin(async move {
            self.call(FakeOperation::CreateNetwork, FAKE_NETWORK_ID).await?;
            Ok(DockerNetwork {
                id: FAKE_NETWORK_ID.to_string(),
            })
        })
    }

    fn create_container<'a>(
        &'a self,
        request: &'a CreateContainerRequest,
    ) -> EngineFuture<'a, CreatedContainer> {
        Box::pin(async move {
            let name = &request.container.name;
            self.call(FakeOperation::CreateContainer, name).await?;

            let mut created = CreatedContainer::new(DockerContainer { id: name.clone() });
            if let Some(path) = self.temporary_files.get(name) {
                created.temporary_files.push(path.clone());
            }
            Ok(created)
        })
    }

    fn start_container<'a>(
        &'a self,
        container: &'a Container,
        _docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move { self.call(FakeOperation::StartContainer, &container.name).await })
    }

    fn run_container<'a>(
        &'a self,
        container: &'a Container,
        _docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, i64> {
        Box::pin(async move {
            self.call(FakeOperation::RunContainer, &container.name).await?;
            Ok(self.exit_code)
        })
    }

    fn wait_for_health<'a>(
        &'a self,
        container: &'a Container,
        _docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, HealthStatus> {
        Box::pin(async move {
            self.call(FakeOperation::WaitForHealth, &container.name).await?;
            Ok(self
                .health
                .get(&container.name)
                .cloned()
                .unwrap_or(HealthStatus::NoHealthCheck))
        })
    }

    fn run_setup_command<'a>(
        &'a self,
        container: &'a Container,
        _docker_container: &'a DockerContainer,
        command: &'a str,
    ) -> EngineFuture<'a, CommandOutput> {
        Box::pin(async move {
            self.call(FakeOperation::RunSetupCommand, &container.name).await?;
            Ok(CommandOutput {
                exit_code: 0,
                output: format!("ran {command}"),
            })
        })
    }

    fn stop_container<'a>(
        &'a self,
        container: &'a Container,
        _docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move { self.call(FakeOperation::StopContainer, &container.name).await })
    }

    fn remove_container<'a>(
        &'a self,
        container: &'a Container,
        _docker_container: &'a DockerContainer,
        _force: bool,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move { self.call(FakeOperation::RemoveContainer, &container.name).await })
    }

    fn delete_network<'a>(&'a self, network: &'a DockerNetwork) -> EngineFuture<'a, ()> {
        Box::pin(async move { self.call(FakeOperation::DeleteNetwork, &network.id).await })
    }
}

/// Event logger that keeps everything it is told.
#[derive(Default)]
pub struct RecordingEventLogger {
    steps: Mutex<Vec<TaskStep>>,
    events: Mutex<Vec<TaskEvent>>,
    failures: Mutex<Vec<String>>,
    manual_cleanups: Mutex<Vec<String>>,
}

impl RecordingEventLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn steps(&self) -> Vec<TaskStep> {
        self.steps.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    pub fn manual_cleanups(&self) -> Vec<String> {
        self.manual_cleanups.lock().unwrap().clone()
    }
}

impl EventLogger for RecordingEventLogger {
    fn on_step_starting(&self, step: &TaskStep) {
        self.steps.lock().unwrap().push(step.clone());
    }

    fn on_event(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_task_failure(&self, message: &str) {
        self.failures.lock().unwrap().push(message.to_string());
    }

    fn on_manual_cleanup_required(&self, instructions: &str) {
        self.manual_cleanups
            .lock()
            .unwrap()
            .push(instructions.to_string());
    }
}
