#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;

use taskpod::config::ConfigFile;
use taskpod::dag::DependencyGraph;
use taskpod::engine::{CancellationSource, TaskRunOptions, run_task};
use taskpod::exec::{StepRunner, TaskStepRunner};
use taskpod::types::CleanupBehaviour;
use taskpod_test_utils::builders::{ConfigFileBuilder, ContainerConfigBuilder, TaskConfigBuilder};
use taskpod_test_utils::{FakeContainerEngine, RecordingEventLogger};

pub use taskpod_test_utils::{init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// `app` (task container) -> `api` -> `db`.
pub fn linear_chain() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_container("db", ContainerConfigBuilder::image("postgres:16").build())
        .with_container(
            "api",
            ContainerConfigBuilder::image("api:latest")
                .depends_on("db")
                .build(),
        )
        .with_container(
            "app",
            ContainerConfigBuilder::build_directory("./app")
                .depends_on("api")
                .build(),
        )
        .with_task("test", TaskConfigBuilder::run("app").command("cargo test").build())
        .build()
}

pub struct RunOutcome {
    pub exit_code: i64,
    pub engine: Arc<FakeContainerEngine>,
    pub logger: Arc<RecordingEventLogger>,
}

pub async fn run_with(
    cfg: &ConfigFile,
    task: &str,
    engine: FakeContainerEngine,
    behaviour_after_failure: CleanupBehaviour,
    max_concurrent_steps: usize,
    cancellation: CancellationSource,
) -> Result<RunOutcome, Box<dyn Error>> {
    let options = TaskRunOptions {
        behaviour_after_failure,
        behaviour_after_success: CleanupBehaviour::Cleanup,
        max_concurrent_steps,
    };
    run_with_runner(cfg, task, engine, options, cancellation, |runner| Arc::new(runner)).await
}

/// Like [`run_with`], but `wrap` decides which runner the engine sees.
pub async fn run_with_runner(
    cfg: &ConfigFile,
    task: &str,
    engine: FakeContainerEngine,
    options: TaskRunOptions,
    cancellation: CancellationSource,
    wrap: impl FnOnce(TaskStepRunner<FakeContainerEngine>) -> Arc<dyn StepRunner>,
) -> Result<RunOutcome, Box<dyn Error>> {
    let graph = Arc::new(DependencyGraph::from_config(cfg, task)?);
    let engine = Arc::new(engine);
    let logger = RecordingEventLogger::new();
    let runner = wrap(TaskStepRunner::new(Arc::clone(&engine), logger.clone()));

    let exit_code = run_task(graph, runner, logger.clone(), options, cancellation).await?;

    Ok(RunOutcome {
        exit_code,
        engine,
        logger,
    })
}

/// Run with cleanup enabled, four workers and no interruption.
pub async fn run(
    cfg: &ConfigFile,
    task: &str,
    engine: FakeContainerEngine,
) -> Result<RunOutcome, Box<dyn Error>> {
    run_with(
        cfg,
        task,
        engine,
        CleanupBehaviour::Cleanup,
        4,
        CancellationSource::never(),
    )
    .await
}
