// src/model/context.rs

use std::sync::Arc;

use crate::dag::DependencyGraph;
use crate::errors::EngineError;
use crate::model::events::{TaskEvent, TaskEventKind};
use crate::model::steps::{TaskStep, TaskStepKind};
use crate::rules::CleanupRule;
use crate::types::CleanupBehaviour;

/// What an event may see and change while it is applied.
///
/// Implemented by the task state machine; kept as a trait so event
/// transitions don't depend on how steps and rules are stored.
pub trait TaskEventContext {
    fn graph(&self) -> Arc<DependencyGraph>;

    fn behaviour_after_failure(&self) -> CleanupBehaviour;

    fn behaviour_after_success(&self) -> CleanupBehaviour;

    /// Every event posted so far, including the one being applied.
    fn events(&self) -> &[TaskEvent];

    fn single_past_event_of_kind(
        &self,
        kind: TaskEventKind,
    ) -> Result<Option<&TaskEvent>, EngineError>;

    fn is_aborting(&self) -> bool;

    /// One-way: once aborting, always aborting.
    fn abort(&mut self);

    fn queue_step(&mut self, step: TaskStep);

    fn remove_pending_steps_of_kind(&mut self, kind: TaskStepKind);

    /// True if a queued or already dispatched step matches.
    fn has_pending_or_processed_step(&self, predicate: &dyn Fn(&TaskStep) -> bool) -> bool;

    /// Install a cleanup rule; installing an identical rule twice is a no-op.
    fn install_rule(&mut self, rule: CleanupRule);

    /// Drop rules that have not fired yet, returning the dropped ones.
    fn remove_pending_rules(
        &mut self,
        predicate: &dyn Fn(&CleanupRule) -> bool,
    ) -> Vec<CleanupRule>;
}
