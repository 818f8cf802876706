// src/exec/event_logger.rs

//! Progress reporting.
//!
//! The execution manager reports every step it starts and every event it
//! receives; the step runner reports task failures and leftover resources
//! while handling `DisplayTaskFailure` and
//! `DisplayManualCleanupInstructions`.

use tracing::{debug, info, warn};

use crate::model::{TaskEvent, TaskStep};

pub trait EventLogger: Send + Sync {
    fn on_step_starting(&self, step: &TaskStep);

    fn on_event(&self, event: &TaskEvent);

    /// A failure message meant for the user, possibly multi-line.
    fn on_task_failure(&self, message: &str);

    /// The task finished but its containers were deliberately left behind.
    fn on_manual_cleanup_required(&self, instructions: &str);
}

/// Default logger: progress through `tracing`, failures on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn on_step_starting(&self, step: &TaskStep) {
        match step {
            TaskStep::BuildImage { .. }
            | TaskStep::PullImage { .. }
            | TaskStep::StartContainer { .. }
            | TaskStep::RunContainer { .. }
            | TaskStep::RunContainerSetupCommands { .. } => info!(step = %step, "starting"),
            _ => debug!(step = %step, "starting"),
        }
    }

    fn on_event(&self, event: &TaskEvent) {
        if event.is_failure() {
            warn!(event = %event, "failure reported");
            return;
        }

        match event {
            TaskEvent::ImageBuilt { .. }
            | TaskEvent::ImagePulled { .. }
            | TaskEvent::ContainerBecameHealthy { .. }
            | TaskEvent::RunningContainerExited { .. } => info!(event = %event),
            _ => debug!(event = %event),
        }
    }

    fn on_task_failure(&self, message: &str) {
        eprintln!("\n{message}\n");
    }

    fn on_manual_cleanup_required(&self, instructions: &str) {
        eprintln!("\n{instructions}\n");
    }
}
