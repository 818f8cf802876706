// src/engine/state_machine.rs

//! Pure task state machine.
//!
//! Owns the step queue, the event log, the abort flag and the installed
//! cleanup rules for one task run. It has no channels, no Tokio types and
//! performs no IO; the execution manager is its only owner and feeds it
//! events one at a time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dag::DependencyGraph;
use crate::errors::EngineError;
use crate::model::{TaskEvent, TaskEventContext, TaskEventKind, TaskStep, TaskStepKind};
use crate::rules::{CleanupRule, RuleEvaluation};
use crate::types::CleanupBehaviour;

pub struct TaskStateMachine {
    graph: Arc<DependencyGraph>,
    behaviour_after_failure: CleanupBehaviour,
    behaviour_after_success: CleanupBehaviour,
    pending_steps: VecDeque<TaskStep>,
    processed_steps: Vec<TaskStep>,
    events: Vec<TaskEvent>,
    aborting: bool,
    pending_rules: Vec<CleanupRule>,
    fired_rules: Vec<CleanupRule>,
}

impl fmt::Debug for TaskStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStateMachine")
            .field("task", &self.graph.task_name())
            .field("pending_steps", &self.pending_steps.len())
            .field("processed_steps", &self.processed_steps.len())
            .field("events", &self.events.len())
            .field("aborting", &self.aborting)
            .finish_non_exhaustive()
    }
}

impl TaskStateMachine {
    /// A fresh machine with `BeginTask` already queued.
    pub fn new(graph: Arc<DependencyGraph>, behaviour_after_failure: CleanupBehaviour) -> Self {
        Self {
            graph,
            behaviour_after_failure,
            behaviour_after_success: CleanupBehaviour::Cleanup,
            pending_steps: VecDeque::from([TaskStep::BeginTask]),
            processed_steps: Vec::new(),
            events: Vec::new(),
            aborting: false,
            pending_rules: Vec::new(),
            fired_rules: Vec::new(),
        }
    }

    /// Leave the task's containers behind after a successful run too.
    pub fn with_behaviour_after_success(mut self, behaviour: CleanupBehaviour) -> Self {
        self.behaviour_after_success = behaviour;
        self
    }

    /// Take the next step in FIFO order and record it as processed.
    ///
    /// `None` means nothing is ready right now, not that the task is done.
    pub fn pop_next_step(&mut self) -> Option<TaskStep> {
        let step = self.pending_steps.pop_front()?;
        debug!(task = %self.graph.task_name(), step = %step, "dispatching step");
        self.processed_steps.push(step.clone());
        Some(step)
    }

    /// Take the first queued step of `kind`, skipping over others.
    pub fn pop_next_step_of_kind(&mut self, kind: TaskStepKind) -> Option<TaskStep> {
        let index = self.pending_steps.iter().position(|s| s.kind() == kind)?;
        let step = self.pending_steps.remove(index)?;
        debug!(task = %self.graph.task_name(), step = %step, "dispatching step");
        self.processed_steps.push(step.clone());
        Some(step)
    }

    /// Record `event`, apply it, then fire any cleanup rule that became
    /// ready.
    pub fn post_event(&mut self, event: TaskEvent) -> Result<(), EngineError> {
        debug!(task = %self.graph.task_name(), event = %event, "posting event");

        self.events.push(event.clone());
        event.apply(self)?;
        self.evaluate_rules();

        Ok(())
    }

    fn evaluate_rules(&mut self) {
        let mut still_pending = Vec::with_capacity(self.pending_rules.len());

        for rule in std::mem::take(&mut self.pending_rules) {
            match rule.evaluate(&self.events, &self.processed_steps) {
                RuleEvaluation::Ready(step) => {
                    debug!(step = %step, "cleanup rule fired");
                    self.queue_step(step);
                    self.fired_rules.push(rule);
                }
                RuleEvaluation::NotReady => still_pending.push(rule),
            }
        }

        self.pending_rules = still_pending;
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting
    }

    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    pub fn past_events_of_kind(&self, kind: TaskEventKind) -> Vec<&TaskEvent> {
        self.events.iter().filter(|e| e.kind() == kind).collect()
    }

    /// At most one event of `kind`; more than one is an invariant violation.
    pub fn single_past_event_of_kind(
        &self,
        kind: TaskEventKind,
    ) -> Result<Option<&TaskEvent>, EngineError> {
        let mut matching = self.events.iter().filter(|e| e.kind() == kind);
        let first = matching.next();
        if matching.next().is_some() {
            return Err(EngineError::DuplicateEvent(kind));
        }
        Ok(first)
    }

    pub fn pending_steps(&self) -> impl Iterator<Item = &TaskStep> {
        self.pending_steps.iter()
    }

    pub fn processed_steps(&self) -> &[TaskStep] {
        &self.processed_steps
    }

    pub fn processed_steps_of_kind(&self, kind: TaskStepKind) -> Vec<&TaskStep> {
        self.processed_steps
            .iter()
            .filter(|s| s.kind() == kind)
            .collect()
    }

    pub fn has_processed_step_of_kind(&self, kind: TaskStepKind) -> bool {
        self.processed_steps.iter().any(|s| s.kind() == kind)
    }

    pub fn pending_and_processed_steps_of_kind(&self, kind: TaskStepKind) -> Vec<&TaskStep> {
        self.pending_steps
            .iter()
            .chain(self.processed_steps.iter())
            .filter(|s| s.kind() == kind)
            .collect()
    }

    pub fn pending_rules(&self) -> &[CleanupRule] {
        &self.pending_rules
    }
}

impl TaskEventContext for TaskStateMachine {
    fn graph(&self) -> Arc<DependencyGraph> {
        Arc::clone(&self.graph)
    }

    fn behaviour_after_failure(&self) -> CleanupBehaviour {
        self.behaviour_after_failure
    }

    fn behaviour_after_success(&self) -> CleanupBehaviour {
        self.behaviour_after_success
    }

    fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    fn single_past_event_of_kind(
        &self,
        kind: TaskEventKind,
    ) -> Result<Option<&TaskEvent>, EngineError> {
        TaskStateMachine::single_past_event_of_kind(self, kind)
    }

    fn is_aborting(&self) -> bool {
        self.aborting
    }

    fn abort(&mut self) {
        if !self.aborting {
            info!(task = %self.graph.task_name(), "aborting task");
        }
        self.aborting = true;
    }

    fn queue_step(&mut self, step: TaskStep) {
        debug!(task = %self.graph.task_name(), step = %step, "queued step");
        self.pending_steps.push_back(step);
    }

    fn remove_pending_steps_of_kind(&mut self, kind: TaskStepKind) {
        self.pending_steps.retain(|step| step.kind() != kind);
    }

    fn has_pending_or_processed_step(&self, predicate: &dyn Fn(&TaskStep) -> bool) -> bool {
        self.pending_steps.iter().any(predicate) || self.processed_steps.iter().any(predicate)
    }

    fn install_rule(&mut self, rule: CleanupRule) {
        if self.pending_rules.contains(&rule) || self.fired_rules.contains(&rule) {
            return;
        }
        self.pending_rules.push(rule);
    }

    fn remove_pending_rules(
        &mut self,
        predicate: &dyn Fn(&CleanupRule) -> bool,
    ) -> Vec<CleanupRule> {
        let (removed, kept): (Vec<CleanupRule>, Vec<CleanupRule>) =
            std::mem::take(&mut self.pending_rules)
                .into_iter()
                .partition(|rule| predicate(rule));
        self.pending_rules = kept;
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::model::TaskConfig;
    use crate::model::{
        Container, DockerContainer, DockerImage, DockerNetwork, TaskRunConfiguration,
    };

    /// `app` (task container) depends on `a` and `b`.
    fn fan_in_graph() -> Arc<DependencyGraph> {
        let mut app = Container::from_image("app", "app-image");
        app.dependencies = ["a".to_string(), "b".to_string()].into();
        let containers: BTreeMap<String, Arc<Container>> = [
            ("app".to_string(), Arc::new(app)),
            ("a".to_string(), Arc::new(Container::from_image("a", "a-image"))),
            ("b".to_string(), Arc::new(Container::from_image("b", "b-image"))),
        ]
        .into();
        let task = TaskConfig {
            run: Some(TaskRunConfiguration {
                container: "app".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        Arc::new(DependencyGraph::build(&containers, "test", &task).unwrap())
    }

    fn container(machine: &TaskStateMachine, name: &str) -> Arc<Container> {
        Arc::clone(machine.graph.node_for(name).unwrap().container())
    }

    fn drain(machine: &mut TaskStateMachine) -> Vec<TaskStep> {
        std::iter::from_fn(|| machine.pop_next_step()).collect()
    }

    fn network() -> DockerNetwork {
        DockerNetwork {
            id: "net-1".to_string(),
        }
    }

    fn docker(name: &str) -> DockerContainer {
        DockerContainer {
            id: format!("{name}-id"),
        }
    }

    fn create_everything(machine: &mut TaskStateMachine) {
        machine.post_event(TaskEvent::TaskStarted).unwrap();
        machine
            .post_event(TaskEvent::TaskNetworkCreated { network: network() })
            .unwrap();
        for (name, image) in [("a", "a-image"), ("b", "b-image"), ("app", "app-image")] {
            machine
                .post_event(TaskEvent::ImagePulled {
                    image_name: image.to_string(),
                    image: DockerImage {
                        id: image.to_string(),
                    },
                })
                .unwrap();
            let c = container(machine, name);
            machine
                .post_event(TaskEvent::ContainerCreated {
                    container: c,
                    docker_container: docker(name),
                })
                .unwrap();
        }
    }

    #[test]
    fn starts_with_begin_task() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        assert_eq!(machine.pop_next_step(), Some(TaskStep::BeginTask));
        assert_eq!(machine.pop_next_step(), None);
        assert_eq!(machine.processed_steps(), &[TaskStep::BeginTask]);
    }

    #[test]
    fn task_started_queues_network_and_one_pull_per_image() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        drain(&mut machine);
        machine.post_event(TaskEvent::TaskStarted).unwrap();

        let steps = drain(&mut machine);
        assert_eq!(steps[0], TaskStep::CreateTaskNetwork);
        assert_eq!(
            steps
                .iter()
                .filter(|s| s.kind() == TaskStepKind::PullImage)
                .count(),
            3
        );
    }

    #[test]
    fn containers_are_created_once_image_and_network_exist() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        drain(&mut machine);

        let a = container(&machine, "a");
        machine
            .post_event(TaskEvent::ImagePulled {
                image_name: "a-image".to_string(),
                image: DockerImage {
                    id: "a-image".to_string(),
                },
            })
            .unwrap();
        assert!(drain(&mut machine).is_empty());

        machine
            .post_event(TaskEvent::TaskNetworkCreated { network: network() })
            .unwrap();
        let steps = drain(&mut machine);
        assert_eq!(steps.len(), 1);
        assert!(matches!(
            &steps[0],
            TaskStep::CreateContainer { container, .. } if *container == a
        ));
    }

    #[test]
    fn dependent_starts_only_after_last_dependency_is_healthy() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        create_everything(&mut machine);
        drain(&mut machine);

        let a = container(&machine, "a");
        let b = container(&machine, "b");

        machine
            .post_event(TaskEvent::ContainerStarted { container: Arc::clone(&a) })
            .unwrap();
        machine
            .post_event(TaskEvent::ContainerBecameHealthy { container: a })
            .unwrap();
        let after_first = drain(&mut machine);
        assert!(
            !after_first
                .iter()
                .any(|s| s.kind() == TaskStepKind::RunContainer),
            "task container must wait for b: {after_first:?}"
        );

        machine
            .post_event(TaskEvent::ContainerStarted { container: Arc::clone(&b) })
            .unwrap();
        machine
            .post_event(TaskEvent::ContainerBecameHealthy { container: b })
            .unwrap();
        let after_second = drain(&mut machine);
        assert_eq!(
            after_second
                .iter()
                .filter(|s| s.kind() == TaskStepKind::RunContainer)
                .count(),
            1
        );
    }

    #[test]
    fn abort_is_one_way() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        assert!(!machine.is_aborting());

        machine.post_event(TaskEvent::UserInterruptedExecution).unwrap();
        assert!(machine.is_aborting());

        let a = container(&machine, "a");
        machine
            .post_event(TaskEvent::ContainerBecameHealthy { container: a })
            .unwrap();
        machine
            .post_event(TaskEvent::ImagePulled {
                image_name: "a-image".to_string(),
                image: DockerImage {
                    id: "a-image".to_string(),
                },
            })
            .unwrap();
        assert!(machine.is_aborting());
    }

    #[test]
    fn failure_cleans_up_every_created_container_then_the_network() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        create_everything(&mut machine);
        drain(&mut machine);

        let a = container(&machine, "a");
        machine
            .post_event(TaskEvent::ContainerStartFailed {
                container: Arc::clone(&a),
                message: "port already allocated".to_string(),
            })
            .unwrap();

        let steps = drain(&mut machine);
        assert!(matches!(
            &steps[0],
            TaskStep::DisplayTaskFailure { message } if message.contains("port already allocated")
        ));
        let cleanups: Vec<&TaskStep> = steps
            .iter()
            .filter(|s| s.kind() == TaskStepKind::CleanUpContainer)
            .collect();
        assert_eq!(cleanups.len(), 3);
        assert!(!steps.iter().any(|s| s.kind() == TaskStepKind::DeleteTaskNetwork));

        // A second failure must not duplicate cleanup.
        machine.post_event(TaskEvent::UserInterruptedExecution).unwrap();
        assert!(
            !drain(&mut machine)
                .iter()
                .any(|s| s.kind() == TaskStepKind::CleanUpContainer)
        );

        for name in ["a", "b", "app"] {
            let c = container(&machine, name);
            machine
                .post_event(TaskEvent::ContainerRemoved { container: c })
                .unwrap();
        }
        let steps = drain(&mut machine);
        assert_eq!(
            steps,
            vec![TaskStep::DeleteTaskNetwork { network: network() }]
        );

        machine.post_event(TaskEvent::TaskNetworkDeleted).unwrap();
        assert!(drain(&mut machine).is_empty());
        assert!(machine.has_processed_step_of_kind(TaskStepKind::DisplayTaskFailure));
    }

    #[test]
    fn single_past_event_rejects_duplicates() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        machine.post_event(TaskEvent::TaskStarted).unwrap();
        assert!(
            machine
                .single_past_event_of_kind(TaskEventKind::TaskStarted)
                .unwrap()
                .is_some()
        );

        machine.post_event(TaskEvent::TaskStarted).unwrap();
        assert_eq!(
            machine.single_past_event_of_kind(TaskEventKind::TaskStarted),
            Err(EngineError::DuplicateEvent(TaskEventKind::TaskStarted))
        );
    }

    #[test]
    fn exit_of_non_task_container_is_an_invariant_violation() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        let a = container(&machine, "a");

        assert_eq!(
            machine.post_event(TaskEvent::RunningContainerExited {
                container: a,
                exit_code: 0
            }),
            Err(EngineError::NotTaskContainer("a".to_string()))
        );
    }

    #[test]
    fn dont_cleanup_leaves_containers_and_prints_instructions() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::DontCleanup);
        create_everything(&mut machine);
        drain(&mut machine);

        let a = container(&machine, "a");
        machine
            .post_event(TaskEvent::ContainerDidNotBecomeHealthy {
                container: a,
                message: "timed out".to_string(),
            })
            .unwrap();

        let steps = drain(&mut machine);
        assert_eq!(steps.len(), 1);
        match &steps[0] {
            TaskStep::DisplayTaskFailure { message } => {
                assert!(message.contains("docker logs a-id"));
                assert!(message.contains(
                    "docker rm --force --volumes a-id b-id app-id && docker network rm net-1"
                ));
            }
            other => panic!("expected DisplayTaskFailure, got {other:?}"),
        }
    }

    #[test]
    fn past_events_of_kind_keeps_posting_order() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        create_everything(&mut machine);

        let pulled: Vec<&str> = machine
            .past_events_of_kind(TaskEventKind::ImagePulled)
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::ImagePulled { image_name, .. } => Some(image_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(pulled, vec!["a-image", "b-image", "app-image"]);
        assert!(
            machine
                .past_events_of_kind(TaskEventKind::TaskNetworkDeleted)
                .is_empty()
        );
    }

    #[test]
    fn dont_cleanup_after_success_finishes_without_teardown() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup)
            .with_behaviour_after_success(CleanupBehaviour::DontCleanup);
        create_everything(&mut machine);
        drain(&mut machine);

        let app = container(&machine, "app");
        machine
            .post_event(TaskEvent::RunningContainerExited {
                container: app,
                exit_code: 0,
            })
            .unwrap();

        let steps = drain(&mut machine);
        assert_eq!(steps.len(), 2, "steps: {steps:?}");
        match &steps[0] {
            TaskStep::DisplayManualCleanupInstructions { message } => {
                assert!(message.contains(
                    "docker rm --force --volumes a-id app-id b-id && docker network rm net-1"
                ));
            }
            other => panic!("expected DisplayManualCleanupInstructions, got {other:?}"),
        }
        assert_eq!(steps[1], TaskStep::FinishTask { exit_code: 0 });
        assert!(!machine.is_aborting());
        assert!(machine.pending_rules().is_empty());
    }

    #[test]
    fn step_queries_cover_pending_and_processed_steps() {
        let mut machine = TaskStateMachine::new(fan_in_graph(), CleanupBehaviour::Cleanup);
        drain(&mut machine);
        machine.post_event(TaskEvent::TaskStarted).unwrap();

        // Dispatch the network and one pull; leave the other pulls queued.
        machine.pop_next_step();
        machine.pop_next_step();

        let pulls = machine.pending_and_processed_steps_of_kind(TaskStepKind::PullImage);
        assert_eq!(pulls.len(), 3);
        assert_eq!(machine.processed_steps_of_kind(TaskStepKind::PullImage).len(), 1);
        assert_eq!(
            machine
                .pending_steps()
                .filter(|s| s.kind() == TaskStepKind::PullImage)
                .count(),
            2
        );
    }
}
