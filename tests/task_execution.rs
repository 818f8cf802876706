// tests/task_execution.rs

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{TestResult, init_tracing, linear_chain, run, run_with_runner, with_timeout};
use taskpod::engine::{CancellationSource, TaskRunOptions};
use taskpod::model::{TaskEvent, TaskStep};
use taskpod::types::CleanupBehaviour;
use taskpod_test_utils::builders::{ConfigFileBuilder, ContainerConfigBuilder, TaskConfigBuilder};
use taskpod_test_utils::fake_engine::FAKE_NETWORK_ID;
use taskpod_test_utils::{FakeContainerEngine, FakeOperation as Op};

fn set(items: Vec<String>) -> BTreeSet<String> {
    items.into_iter().collect()
}

#[tokio::test]
async fn linear_chain_starts_in_order_and_tears_down_in_reverse() -> TestResult {
    init_tracing();
    let cfg = linear_chain();

    let outcome = with_timeout(run(&cfg, "test", FakeContainerEngine::new())).await?;
    let engine = &outcome.engine;

    assert_eq!(outcome.exit_code, 0);

    assert_eq!(engine.targets(Op::BuildImage), vec!["app"]);
    assert_eq!(
        set(engine.targets(Op::PullImage)),
        set(vec!["postgres:16".into(), "api:latest".into()])
    );
    assert_eq!(engine.targets(Op::CreateNetwork).len(), 1);

    let pos = |op, target| engine.position(op, target).expect("call missing");
    assert!(pos(Op::WaitForHealth, "db") < pos(Op::StartContainer, "api"));
    assert!(pos(Op::WaitForHealth, "api") < pos(Op::RunContainer, "app"));
    assert!(!engine.was_called(Op::StartContainer, "app"));

    // Teardown: dependents stop before what they depend on.
    assert!(pos(Op::RunContainer, "app") < pos(Op::StopContainer, "api"));
    assert!(pos(Op::StopContainer, "api") < pos(Op::StopContainer, "db"));
    assert!(pos(Op::StopContainer, "db") < pos(Op::RemoveContainer, "db"));
    assert_eq!(
        set(engine.targets(Op::RemoveContainer)),
        set(vec!["app".into(), "api".into(), "db".into()])
    );

    // The network goes last, exactly once.
    assert_eq!(engine.targets(Op::DeleteNetwork), vec![FAKE_NETWORK_ID]);
    let last = engine.calls().last().cloned().expect("no calls recorded");
    assert_eq!(last.operation, Op::DeleteNetwork);

    assert!(outcome.logger.failures().is_empty());
    Ok(())
}

#[tokio::test]
async fn task_container_gets_the_task_command_and_environment() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_container(
            "app",
            ContainerConfigBuilder::image("alpine")
                .command("sleep 1")
                .env("MODE", "container")
                .build(),
        )
        .with_task(
            "check",
            TaskConfigBuilder::run("app")
                .command("echo hi")
                .env("CI", "true")
                .build(),
        )
        .build();

    let outcome = with_timeout(run(&cfg, "check", FakeContainerEngine::new())).await?;

    let create = outcome
        .logger
        .steps()
        .into_iter()
        .find_map(|step| match step {
            TaskStep::CreateContainer {
                command,
                additional_environment,
                ..
            } => Some((command, additional_environment)),
            _ => None,
        })
        .expect("no CreateContainer step");

    assert_eq!(create.0.as_deref(), Some("echo hi"));
    assert_eq!(create.1.get("CI").map(String::as_str), Some("true"));
    Ok(())
}

#[tokio::test]
async fn dependent_waits_for_every_dependency() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_container("a", ContainerConfigBuilder::image("a").build())
        .with_container("b", ContainerConfigBuilder::image("b").build())
        .with_container(
            "c",
            ContainerConfigBuilder::image("c")
                .depends_on("a")
                .depends_on("b")
                .build(),
        )
        .with_task("t", TaskConfigBuilder::run("c").build())
        .build();

    let outcome = with_timeout(run(&cfg, "t", FakeContainerEngine::new())).await?;
    let engine = &outcome.engine;
    assert_eq!(outcome.exit_code, 0);

    let run_c = engine.position(Op::RunContainer, "c").expect("c never ran");
    for dependency in ["a", "b"] {
        let healthy = engine
            .position(Op::WaitForHealth, dependency)
            .expect("dependency never checked");
        assert!(healthy < run_c, "{dependency} must be healthy before c runs");
    }
    Ok(())
}

#[tokio::test]
async fn setup_commands_run_before_dependents_start() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_container(
            "db",
            ContainerConfigBuilder::image("postgres")
                .setup_command("./seed.sh")
                .setup_command("./migrate.sh")
                .build(),
        )
        .with_container(
            "app",
            ContainerConfigBuilder::image("app").depends_on("db").build(),
        )
        .with_task("t", TaskConfigBuilder::run("app").build())
        .build();

    let outcome = with_timeout(run(&cfg, "t", FakeContainerEngine::new())).await?;
    let engine = &outcome.engine;

    assert_eq!(engine.targets(Op::RunSetupCommand), vec!["db", "db"]);
    let last_setup = engine
        .calls()
        .iter()
        .rposition(|c| c.operation == Op::RunSetupCommand)
        .expect("no setup commands ran");
    assert!(last_setup < engine.position(Op::RunContainer, "app").expect("app never ran"));
    assert!(outcome.logger.events().iter().any(|e| matches!(
        e,
        TaskEvent::ContainerSetupCommandsCompleted { container } if container.name == "db"
    )));
    Ok(())
}

#[tokio::test]
async fn task_exit_code_is_returned() -> TestResult {
    init_tracing();
    let cfg = linear_chain();

    let outcome = with_timeout(run(&cfg, "test", FakeContainerEngine::new().exit_code(3))).await?;

    assert_eq!(outcome.exit_code, 3);
    // A failing task container still gets a normal teardown.
    assert_eq!(outcome.engine.targets(Op::RemoveContainer).len(), 3);
    assert!(outcome.logger.failures().is_empty());
    Ok(())
}

#[tokio::test]
async fn temporary_files_are_deleted_after_their_container() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let env_file = dir.path().join("app.env");
    std::fs::write(&env_file, "MODE=test\n")?;

    let cfg = linear_chain();
    let engine = FakeContainerEngine::new().temporary_file("app", env_file.clone());

    let outcome = with_timeout(run(&cfg, "test", engine)).await?;

    assert_eq!(outcome.exit_code, 0);
    assert!(!env_file.exists());

    let events = outcome.logger.events();
    let created = events
        .iter()
        .position(|e| matches!(e, TaskEvent::TemporaryFileCreated { .. }))
        .expect("temporary file not reported");
    let removed = events
        .iter()
        .position(|e| {
            matches!(e, TaskEvent::ContainerRemoved { container } if container.name == "app")
        })
        .expect("app not removed");
    let deleted = events
        .iter()
        .position(|e| matches!(e, TaskEvent::TemporaryFileDeleted { .. }))
        .expect("temporary file not deleted");
    assert!(created < removed && removed < deleted);
    Ok(())
}

#[tokio::test]
async fn shared_images_are_pulled_once() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_container("cache", ContainerConfigBuilder::image("redis:7").build())
        .with_container("queue", ContainerConfigBuilder::image("redis:7").build())
        .with_task(
            "t",
            TaskConfigBuilder::run("cache").dependency("queue").build(),
        )
        .build();

    let outcome = with_timeout(run(&cfg, "t", FakeContainerEngine::new())).await?;

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.engine.targets(Op::PullImage), vec!["redis:7"]);
    assert_eq!(outcome.engine.targets(Op::CreateContainer).len(), 2);
    Ok(())
}

#[tokio::test]
async fn dont_cleanup_after_success_leaves_everything_and_prints_commands() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let env_file = dir.path().join("app.env");
    std::fs::write(&env_file, "MODE=test\n")?;

    let cfg = linear_chain();
    let engine = FakeContainerEngine::new()
        .temporary_file("app", env_file.clone())
        .exit_code(2);
    let options = TaskRunOptions {
        behaviour_after_failure: CleanupBehaviour::Cleanup,
        behaviour_after_success: CleanupBehaviour::DontCleanup,
        max_concurrent_steps: 4,
    };

    let outcome = with_timeout(run_with_runner(
        &cfg,
        "test",
        engine,
        options,
        CancellationSource::never(),
        |runner| Arc::new(runner),
    ))
    .await?;
    let engine = &outcome.engine;

    // The task's own exit code, not a failure.
    assert_eq!(outcome.exit_code, 2);
    assert!(outcome.logger.failures().is_empty());

    assert!(engine.targets(Op::StopContainer).is_empty());
    assert!(engine.targets(Op::RemoveContainer).is_empty());
    assert!(engine.targets(Op::DeleteNetwork).is_empty());
    assert!(env_file.exists());

    let instructions = outcome.logger.manual_cleanups();
    assert_eq!(instructions.len(), 1, "instructions: {instructions:?}");
    let message = &instructions[0];
    assert!(message.starts_with(
        "As the task was run with cleanup after success disabled, the created containers will \
         not be cleaned up."
    ));
    assert!(message.contains("view its output by running 'docker logs db'"));
    assert!(message.ends_with(&format!(
        "Once you have finished using the containers, clean up all containers and the task \
         network by running:\n\n    docker rm --force --volumes api app db && rm {} && \
         docker network rm {FAKE_NETWORK_ID}",
        env_file.display()
    )));
    Ok(())
}
