// tests/concurrency_and_interrupt.rs

mod common;

use std::time::Duration;

use common::{TestResult, init_tracing, linear_chain, run_with, with_timeout};
use taskpod::config::ConfigFile;
use taskpod::engine::{CancellationSource, FAILURE_EXIT_CODE};
use taskpod::model::TaskEvent;
use taskpod::types::CleanupBehaviour;
use taskpod_test_utils::builders::{ConfigFileBuilder, ContainerConfigBuilder, TaskConfigBuilder};
use taskpod_test_utils::{FakeContainerEngine, FakeOperation as Op};
use tokio::sync::oneshot;

/// `app` depends on `width` independent services, each with its own image.
fn wide_fan_out(width: usize) -> ConfigFile {
    let mut app = ContainerConfigBuilder::image("app");
    let mut builder = ConfigFileBuilder::new();
    for i in 0..width {
        let name = format!("svc{i}");
        let image = format!("svc-image-{i}");
        builder = builder.with_container(&name, ContainerConfigBuilder::image(&image).build());
        app = app.depends_on(&name);
    }
    builder
        .with_container("app", app.build())
        .with_task("t", TaskConfigBuilder::run("app").build())
        .build()
}

#[tokio::test]
async fn never_more_steps_in_flight_than_the_limit() -> TestResult {
    init_tracing();
    let cfg = wide_fan_out(8);
    let engine = FakeContainerEngine::new().delay(Duration::from_millis(5));

    let outcome = with_timeout(run_with(
        &cfg,
        "t",
        engine,
        CleanupBehaviour::Cleanup,
        3,
        CancellationSource::never(),
    ))
    .await?;

    assert_eq!(outcome.exit_code, 0);
    let max = outcome.engine.max_in_flight();
    assert!(max <= 3, "saw {max} concurrent engine calls");
    assert!(max >= 2, "independent steps should overlap, saw {max}");
    assert_eq!(outcome.engine.targets(Op::RemoveContainer).len(), 9);
    Ok(())
}

#[tokio::test]
async fn single_worker_runs_steps_one_at_a_time() -> TestResult {
    init_tracing();
    let cfg = wide_fan_out(4);
    let engine = FakeContainerEngine::new().delay(Duration::from_millis(1));

    let outcome = with_timeout(run_with(
        &cfg,
        "t",
        engine,
        CleanupBehaviour::Cleanup,
        1,
        CancellationSource::never(),
    ))
    .await?;

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.engine.max_in_flight(), 1);
    Ok(())
}

#[tokio::test]
async fn interrupt_while_task_runs_cleans_up_everything() -> TestResult {
    init_tracing();
    let cfg = linear_chain();
    let engine = FakeContainerEngine::new().run_delay(Duration::from_millis(500));

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(());
    });

    let outcome = with_timeout(run_with(
        &cfg,
        "test",
        engine,
        CleanupBehaviour::Cleanup,
        4,
        CancellationSource::from_receiver(rx),
    ))
    .await?;
    let engine = &outcome.engine;

    assert_eq!(outcome.exit_code, FAILURE_EXIT_CODE);
    assert!(engine.was_called(Op::RunContainer, "app"));
    assert_eq!(
        engine.targets(Op::RemoveContainer).len(),
        engine.targets(Op::CreateContainer).len()
    );
    assert_eq!(engine.targets(Op::DeleteNetwork).len(), 1);
    // Interrupted teardown removes containers directly rather than stopping them.
    assert!(engine.targets(Op::StopContainer).is_empty());

    let events = outcome.logger.events();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, TaskEvent::UserInterruptedExecution))
            .count(),
        1
    );
    assert_eq!(outcome.logger.failures(), vec!["The task was interrupted."]);
    Ok(())
}

#[tokio::test]
async fn dropped_interrupt_sender_does_not_cancel() -> TestResult {
    init_tracing();
    let cfg = linear_chain();
    let (tx, rx) = oneshot::channel::<()>();
    drop(tx);

    let outcome = with_timeout(run_with(
        &cfg,
        "test",
        FakeContainerEngine::new(),
        CleanupBehaviour::Cleanup,
        2,
        CancellationSource::from_receiver(rx),
    ))
    .await?;

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.logger.failures().is_empty());
    Ok(())
}
