// src/engine/manager.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::{Id, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::errors::EngineError;
use crate::exec::{EventLogger, StepRunner};
use crate::model::{TaskEvent, TaskStep, TaskStepKind};

use super::cancellation::CancellationSource;
use super::state_machine::TaskStateMachine;

/// Exit code reported when a task ends through a failure rather than by
/// its container exiting.
pub const FAILURE_EXIT_CODE: i64 = -1;

/// Drives one [`TaskStateMachine`] to completion.
///
/// The manager is the only owner of the state machine. Steps run on a
/// bounded set of Tokio tasks; their events come back through the
/// `JoinSet` and are posted one at a time.
pub struct ParallelExecutionManager {
    state_machine: TaskStateMachine,
    runner: Arc<dyn StepRunner>,
    logger: Arc<dyn EventLogger>,
    max_concurrent_steps: usize,
}

impl fmt::Debug for ParallelExecutionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelExecutionManager")
            .field("state_machine", &self.state_machine)
            .field("max_concurrent_steps", &self.max_concurrent_steps)
            .finish_non_exhaustive()
    }
}

impl ParallelExecutionManager {
    pub fn new(
        state_machine: TaskStateMachine,
        runner: Arc<dyn StepRunner>,
        logger: Arc<dyn EventLogger>,
        max_concurrent_steps: usize,
    ) -> Self {
        Self {
            state_machine,
            runner,
            logger,
            max_concurrent_steps: max_concurrent_steps.max(1),
        }
    }

    /// Run until the task finishes, fails, or gets stuck.
    ///
    /// Returns the task container's exit code, or [`FAILURE_EXIT_CODE`]
    /// when a failure was reported, including one during teardown. Invariant violations are
    /// returned as errors once every in-flight step has completed.
    pub async fn run(mut self, mut cancellation: CancellationSource) -> Result<i64, EngineError> {
        let task = self.state_machine.graph().task_name().to_string();
        info!(
            task = %task,
            max_concurrent_steps = self.max_concurrent_steps,
            "running task"
        );

        let mut workers: JoinSet<Vec<TaskEvent>> = JoinSet::new();
        let mut in_flight: HashMap<Id, TaskStepKind> = HashMap::new();
        let mut outcome: Option<Result<i64, EngineError>> = None;
        let mut interrupted = false;

        loop {
            if outcome.is_none() {
                outcome = self.dispatch_ready_steps(&mut workers, &mut in_flight);
            } else if matches!(outcome, Some(Ok(_))) {
                // Teardown still in flight can fail after the task finished.
                self.dispatch_failure_reports(&mut workers, &mut in_flight);
            }

            if workers.is_empty() {
                return match outcome {
                    Some(Ok(exit_code)) => Ok(self.finished_exit_code(exit_code)),
                    Some(Err(e)) => Err(e),
                    None => self.finish_without_exit(),
                };
            }

            let stopping = outcome.is_some();

            tokio::select! {
                joined = workers.join_next_with_id() => {
                    let Some(joined) = joined else { continue };
                    let events = match joined {
                        Ok((id, events)) => {
                            in_flight.remove(&id);
                            events
                        }
                        Err(join_error) => {
                            let kind = in_flight.remove(&join_error.id());
                            error!(
                                task = %task,
                                step = ?kind,
                                error = %join_error,
                                "step worker failed"
                            );
                            vec![TaskEvent::ExecutionFailed {
                                message: match kind {
                                    Some(kind) => format!(
                                        "During execution of step of kind '{kind:?}': {join_error}"
                                    ),
                                    None => join_error.to_string(),
                                },
                            }]
                        }
                    };

                    for event in events {
                        self.post(event, &mut outcome);
                    }
                }
                _ = cancellation.cancelled(), if !interrupted && !stopping => {
                    interrupted = true;
                    info!(task = %task, "interrupt requested");
                    self.post(TaskEvent::UserInterruptedExecution, &mut outcome);
                }
            }
        }
    }

    /// Spawn ready steps up to the concurrency limit.
    ///
    /// Returns the run's outcome if `FinishTask` was reached.
    fn dispatch_ready_steps(
        &mut self,
        workers: &mut JoinSet<Vec<TaskEvent>>,
        in_flight: &mut HashMap<Id, TaskStepKind>,
    ) -> Option<Result<i64, EngineError>> {
        while workers.len() < self.max_concurrent_steps {
            let step = self.state_machine.pop_next_step()?;

            if let TaskStep::FinishTask { exit_code } = step {
                info!(
                    task = %self.state_machine.graph().task_name(),
                    exit_code,
                    "task finished"
                );
                return Some(Ok(exit_code));
            }

            self.spawn_step(step, workers, in_flight);
        }

        None
    }

    /// After `FinishTask`, only failure reports are still dispatched.
    fn dispatch_failure_reports(
        &mut self,
        workers: &mut JoinSet<Vec<TaskEvent>>,
        in_flight: &mut HashMap<Id, TaskStepKind>,
    ) {
        while workers.len() < self.max_concurrent_steps {
            let Some(step) = self
                .state_machine
                .pop_next_step_of_kind(TaskStepKind::DisplayTaskFailure)
            else {
                return;
            };
            self.spawn_step(step, workers, in_flight);
        }
    }

    fn spawn_step(
        &self,
        step: TaskStep,
        workers: &mut JoinSet<Vec<TaskEvent>>,
        in_flight: &mut HashMap<Id, TaskStepKind>,
    ) {
        self.logger.on_step_starting(&step);

        let kind = step.kind();
        let span = info_span!(
            "step",
            task = %self.state_machine.graph().task_name(),
            step = %step,
        );
        let runner = Arc::clone(&self.runner);
        let handle = workers.spawn(async move { runner.run(step).await }.instrument(span));

        debug!(step = ?kind, in_flight = workers.len(), "step dispatched");
        in_flight.insert(handle.id(), kind);
    }

    /// Post one event; the first invariant violation becomes the outcome.
    fn post(&mut self, event: TaskEvent, outcome: &mut Option<Result<i64, EngineError>>) {
        self.logger.on_event(&event);

        if matches!(outcome, Some(Err(_))) {
            debug!(event = %event, "ignoring event after engine error");
            return;
        }

        if let Err(e) = self.state_machine.post_event(event) {
            error!(error = %e, "engine invariant violated; stopping");
            *outcome = Some(Err(e));
        }
    }

    /// The exit code to report once `FinishTask` ran and every worker is
    /// done. A failure reported during teardown overrides the task's own.
    fn finished_exit_code(&self, exit_code: i64) -> i64 {
        if self
            .state_machine
            .has_processed_step_of_kind(TaskStepKind::DisplayTaskFailure)
        {
            warn!(
                task = %self.state_machine.graph().task_name(),
                exit_code,
                "task finished but cleanup failed"
            );
            return FAILURE_EXIT_CODE;
        }
        exit_code
    }

    /// Nothing ready and nothing running.
    fn finish_without_exit(&self) -> Result<i64, EngineError> {
        if self
            .state_machine
            .has_processed_step_of_kind(TaskStepKind::DisplayTaskFailure)
        {
            warn!(
                task = %self.state_machine.graph().task_name(),
                "task failed"
            );
            return Ok(FAILURE_EXIT_CODE);
        }

        error!(
            task = %self.state_machine.graph().task_name(),
            pending_rules = self.state_machine.pending_rules().len(),
            "no steps ready and none running"
        );
        Err(EngineError::NoStepsReady)
    }
}
