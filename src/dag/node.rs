// src/dag/node.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::model::Container;

/// One container in a task's dependency graph.
///
/// Edges are stored as container names; resolve them through
/// [`DependencyGraph::node_for`](super::DependencyGraph::node_for).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraphNode {
    pub(super) container: Arc<Container>,
    pub(super) is_root_node: bool,
    pub(super) depends_on: BTreeSet<String>,
    pub(super) depended_on_by: BTreeSet<String>,
}

impl DependencyGraphNode {
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.container.name
    }

    /// True for the task container.
    pub fn is_root_node(&self) -> bool {
        self.is_root_node
    }

    /// Containers that must be ready before this one starts.
    ///
    /// For the root node this includes the task's own `dependencies`.
    pub fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    /// Containers that list this one in `depends_on`.
    pub fn depended_on_by(&self) -> &BTreeSet<String> {
        &self.depended_on_by
    }
}
