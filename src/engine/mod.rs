// src/engine/mod.rs

//! Task execution engine.
//!
//! - [`state_machine`] is the pure core: step queue, event log, abort flag
//!   and cleanup rules. No IO.
//! - [`manager`] is the async shell that runs steps in parallel and feeds
//!   their events back into the state machine.
//! - [`cancellation`] is the per-run interrupt source.

pub mod cancellation;
pub mod manager;
pub mod state_machine;

use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::dag::DependencyGraph;
use crate::errors::EngineError;
use crate::exec::{EventLogger, StepRunner};
use crate::types::CleanupBehaviour;

pub use cancellation::CancellationSource;
pub use manager::{FAILURE_EXIT_CODE, ParallelExecutionManager};
pub use state_machine::TaskStateMachine;

/// Options for a single task run.
#[derive(Debug, Clone, Copy)]
pub struct TaskRunOptions {
    pub behaviour_after_failure: CleanupBehaviour,
    pub behaviour_after_success: CleanupBehaviour,
    pub max_concurrent_steps: usize,
}

impl Default for TaskRunOptions {
    fn default() -> Self {
        Self {
            behaviour_after_failure: CleanupBehaviour::Cleanup,
            behaviour_after_success: CleanupBehaviour::Cleanup,
            max_concurrent_steps: default_max_concurrent_steps(),
        }
    }
}

/// Host parallelism, or 1 if it can't be determined.
pub fn default_max_concurrent_steps() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Run one task's containers to completion and return its exit code.
pub async fn run_task(
    graph: Arc<DependencyGraph>,
    runner: Arc<dyn StepRunner>,
    logger: Arc<dyn EventLogger>,
    options: TaskRunOptions,
    cancellation: CancellationSource,
) -> Result<i64, EngineError> {
    let state_machine = TaskStateMachine::new(graph, options.behaviour_after_failure)
        .with_behaviour_after_success(options.behaviour_after_success);
    ParallelExecutionManager::new(state_machine, runner, logger, options.max_concurrent_steps)
        .run(cancellation)
        .await
}
