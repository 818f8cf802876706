// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::config::model::{ConfigFile, TaskConfig};
use crate::dag::errors::DependencyResolutionError;
use crate::dag::node::DependencyGraphNode;
use crate::errors::{EngineError, TaskpodError};
use crate::model::{Container, TaskRunConfiguration};

type BuildResult<T> = std::result::Result<T, DependencyResolutionError>;

/// The containers needed to run one task, and how they depend on each other.
///
/// Built once per task run and never mutated afterwards. Every node is
/// reachable from the task container (the root), and the graph is acyclic.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    task_name: String,
    run_configuration: TaskRunConfiguration,
    root: String,
    nodes: BTreeMap<String, DependencyGraphNode>,
}

impl DependencyGraph {
    /// Build the graph for `task_name` from a validated config.
    pub fn from_config(cfg: &ConfigFile, task_name: &str) -> crate::errors::Result<Self> {
        let task = cfg
            .task
            .get(task_name)
            .ok_or_else(|| TaskpodError::TaskNotFound(task_name.to_string()))?;

        Ok(Self::build(&cfg.container, task_name, task)?)
    }

    /// Resolve the task container and everything it (transitively) depends on.
    pub fn build(
        containers: &BTreeMap<String, Arc<Container>>,
        task_name: &str,
        task: &TaskConfig,
    ) -> BuildResult<Self> {
        let run = task
            .run
            .as_ref()
            .ok_or_else(|| DependencyResolutionError::TaskHasNoRunConfiguration {
                task: task_name.to_string(),
            })?;

        let task_dependencies: BTreeSet<String> = task.dependencies.iter().cloned().collect();

        if task_dependencies.contains(&run.container) {
            return Err(DependencyResolutionError::TaskContainerIsDependency {
                task: task_name.to_string(),
                container: run.container.clone(),
            });
        }

        let mut builder = GraphBuilder {
            containers,
            task_name,
            task_dependencies: &task_dependencies,
            root: &run.container,
            resolved: BTreeMap::new(),
        };

        let task_reference = format!("task '{task_name}'");
        let root_container = builder.find(&run.container, &task_reference)?;
        for name in task_dependencies.iter() {
            builder.find(name, &task_reference)?;
        }

        let mut root_dependencies = task_dependencies.clone();
        root_dependencies.extend(root_container.dependencies.iter().cloned());

        builder.resolve(&root_container, root_dependencies, &[])?;

        let graph = Self::from_resolved(task_name, run.clone(), builder.resolved);
        debug!(
            task = %task_name,
            containers = graph.nodes.len(),
            root = %graph.root,
            "built dependency graph"
        );
        Ok(graph)
    }

    fn from_resolved(
        task_name: &str,
        run_configuration: TaskRunConfiguration,
        resolved: BTreeMap<String, (Arc<Container>, BTreeSet<String>)>,
    ) -> Self {
        let root = run_configuration.container.clone();

        let mut nodes: BTreeMap<String, DependencyGraphNode> = resolved
            .into_iter()
            .map(|(name, (container, depends_on))| {
                let node = DependencyGraphNode {
                    is_root_node: name == root,
                    container,
                    depends_on,
                    depended_on_by: BTreeSet::new(),
                };
                (name, node)
            })
            .collect();

        // Reverse edges, computed once now that the full node set is known.
        let edges: Vec<(String, String)> = nodes
            .values()
            .flat_map(|node| {
                node.depends_on
                    .iter()
                    .map(move |dep| (dep.clone(), node.name().to_string()))
            })
            .collect();

        for (dependency, dependent) in edges {
            if let Some(node) = nodes.get_mut(&dependency) {
                node.depended_on_by.insert(dependent);
            }
        }

        Self {
            task_name: task_name.to_string(),
            run_configuration,
            root,
            nodes,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn run_configuration(&self) -> &TaskRunConfiguration {
        &self.run_configuration
    }

    /// The node for the task container.
    pub fn root_node(&self) -> &DependencyGraphNode {
        // `build` always inserts the root.
        &self.nodes[&self.root]
    }

    pub fn is_root(&self, container_name: &str) -> bool {
        self.root == container_name
    }

    /// Look up a node by container name.
    ///
    /// Asking for a container outside the graph is an engine bug.
    pub fn node_for(&self, container_name: &str) -> Result<&DependencyGraphNode, EngineError> {
        self.nodes
            .get(container_name)
            .ok_or_else(|| EngineError::ContainerNotInGraph(container_name.to_string()))
    }

    pub fn contains(&self, container_name: &str) -> bool {
        self.nodes.contains_key(container_name)
    }

    /// All nodes, in container name order.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyGraphNode> {
        self.nodes.values()
    }

    pub fn all_containers(&self) -> impl Iterator<Item = &Arc<Container>> {
        self.nodes.values().map(|node| &node.container)
    }

    /// Container names ordered so that every container comes after all of
    /// its dependencies.
    pub fn startup_order(&self) -> Vec<&str> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for node in self.nodes.values() {
            for dep in node.depends_on.iter() {
                graph.add_edge(dep.as_str(), node.name(), ());
            }
        }

        toposort(&graph, None).unwrap_or_else(|_| self.nodes.keys().map(String::as_str).collect())
    }
}

struct GraphBuilder<'a> {
    containers: &'a BTreeMap<String, Arc<Container>>,
    task_name: &'a str,
    task_dependencies: &'a BTreeSet<String>,
    root: &'a str,
    resolved: BTreeMap<String, (Arc<Container>, BTreeSet<String>)>,
}

impl GraphBuilder<'_> {
    fn find(&self, name: &str, referenced_by: &str) -> BuildResult<Arc<Container>> {
        self.containers.get(name).cloned().ok_or_else(|| {
            DependencyResolutionError::ContainerDoesNotExist {
                container: name.to_string(),
                referenced_by: referenced_by.to_string(),
            }
        })
    }

    /// Depth-first resolution; `path` is the chain of containers currently
    /// being resolved, starting at the root.
    fn resolve(
        &mut self,
        container: &Arc<Container>,
        dependencies: BTreeSet<String>,
        path: &[String],
    ) -> BuildResult<()> {
        if self.resolved.contains_key(&container.name) {
            return Ok(());
        }

        let reference = format!("container '{}'", container.name);
        let mut dependency_containers = Vec::with_capacity(dependencies.len());
        for name in dependencies.iter() {
            if name == &container.name {
                continue;
            }
            dependency_containers.push(self.find(name, &reference)?);
        }

        if dependencies.contains(&container.name) {
            return Err(DependencyResolutionError::SelfDependency {
                container: container.name.clone(),
            });
        }

        let mut new_path = path.to_vec();
        new_path.push(container.name.clone());

        if path.contains(&container.name) {
            return Err(self.cycle_error(&new_path));
        }

        for dependency in dependency_containers {
            let own_dependencies = dependency.dependencies.clone();
            self.resolve(&dependency, own_dependencies, &new_path)?;
        }

        self.resolved
            .insert(container.name.clone(), (Arc::clone(container), dependencies));
        Ok(())
    }

    fn cycle_error(&self, path: &[String]) -> DependencyResolutionError {
        let due_to_task_dependency = path
            .get(1)
            .is_some_and(|second| self.task_dependencies.contains(second));

        let description = if due_to_task_dependency {
            self.describe_task_dependency_cycle(path)
        } else {
            describe_container_cycle(path)
        };

        DependencyResolutionError::Cycle {
            task: self.task_name.to_string(),
            description,
        }
    }

    fn describe_task_dependency_cycle(&self, path: &[String]) -> String {
        let names: Vec<String> = path[1..].iter().map(|n| format!("'{n}'")).collect();
        let inner = &names[1..names.len() - 1];

        let first = format!(
            "Container {} (which is explicitly started by the task)",
            names[0]
        );
        let last = match path.last() {
            Some(last) if last == self.root => {
                format!("the task container {}", names[names.len() - 1])
            }
            _ => names[names.len() - 1].clone(),
        };

        let outgoing = std::iter::once(first).chain(inner.iter().cloned());
        let incoming = inner.iter().cloned().chain(std::iter::once(last));

        let links: Vec<String> = outgoing
            .zip(incoming)
            .map(|(from, to)| format!("{from} depends on {to}"))
            .collect();

        format!("{}.", links.join(", and "))
    }
}

fn describe_container_cycle(path: &[String]) -> String {
    let names: Vec<String> = path.iter().map(|n| format!("'{n}'")).collect();
    format!(
        "Container {} depends on {}.",
        names[0],
        names[1..].join(", which depends on ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, deps: &[&str]) -> (String, Arc<Container>) {
        let mut c = Container::from_image(name, "alpine:3");
        c.dependencies = deps.iter().map(|d| d.to_string()).collect();
        (name.to_string(), Arc::new(c))
    }

    fn task(run: &str, deps: &[&str]) -> TaskConfig {
        TaskConfig {
            run: Some(TaskRunConfiguration {
                container: run.to_string(),
                ..Default::default()
            }),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn containers(list: Vec<(String, Arc<Container>)>) -> BTreeMap<String, Arc<Container>> {
        list.into_iter().collect()
    }

    #[test]
    fn builds_nodes_with_eager_reverse_edges() {
        let cs = containers(vec![
            container("app", &["db", "cache"]),
            container("db", &[]),
            container("cache", &["db"]),
        ]);

        let graph = DependencyGraph::build(&cs, "test", &task("app", &[])).unwrap();

        assert!(graph.root_node().is_root_node());
        assert_eq!(graph.root_node().name(), "app");

        let db = graph.node_for("db").unwrap();
        assert!(!db.is_root_node());
        assert!(db.depends_on().is_empty());
        assert_eq!(
            db.depended_on_by().iter().cloned().collect::<Vec<_>>(),
            vec!["app".to_string(), "cache".to_string()]
        );

        let order = graph.startup_order();
        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos("db") < pos("cache"));
        assert!(pos("cache") < pos("app"));
    }

    #[test]
    fn task_dependencies_become_root_dependencies() {
        let cs = containers(vec![container("app", &[]), container("proxy", &[])]);
        let graph = DependencyGraph::build(&cs, "test", &task("app", &["proxy"])).unwrap();

        assert!(graph.root_node().depends_on().contains("proxy"));
        assert!(graph.node_for("proxy").unwrap().depended_on_by().contains("app"));
    }

    #[test]
    fn containers_outside_the_task_are_not_included() {
        let cs = containers(vec![container("app", &[]), container("other", &[])]);
        let graph = DependencyGraph::build(&cs, "test", &task("app", &[])).unwrap();

        assert!(!graph.contains("other"));
        assert_eq!(
            graph.node_for("other"),
            Err(EngineError::ContainerNotInGraph("other".to_string()))
        );
    }

    #[test]
    fn reports_container_cycle_with_full_chain() {
        let cs = containers(vec![
            container("app", &["a"]),
            container("a", &["b"]),
            container("b", &["a"]),
        ]);

        let err = DependencyGraph::build(&cs, "test", &task("app", &[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "There is a dependency cycle in task 'test'. Container 'app' depends on 'a', \
             which depends on 'b', which depends on 'a'."
        );
    }

    #[test]
    fn reports_cycle_through_task_dependency() {
        let cs = containers(vec![
            container("app", &[]),
            container("x", &["y"]),
            container("y", &["app"]),
        ]);

        let err = DependencyGraph::build(&cs, "test", &task("app", &["x"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "There is a dependency cycle in task 'test'. Container 'x' (which is explicitly \
             started by the task) depends on 'y', and 'y' depends on the task container 'app'."
        );
    }

    #[test]
    fn rejects_self_dependency() {
        let cs = containers(vec![container("app", &["db"]), container("db", &["db"])]);

        let err = DependencyGraph::build(&cs, "test", &task("app", &[])).unwrap_err();
        assert_eq!(
            err,
            DependencyResolutionError::SelfDependency {
                container: "db".to_string()
            }
        );
    }

    #[test]
    fn rejects_task_container_as_dependency() {
        let cs = containers(vec![container("app", &[])]);

        let err = DependencyGraph::build(&cs, "test", &task("app", &["app"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The task 'test' cannot have the container 'app' as both the main task container \
             and also a dependency."
        );
    }

    #[test]
    fn reports_missing_containers_with_their_referrer() {
        let cs = containers(vec![container("app", &["ghost"])]);
        let err = DependencyGraph::build(&cs, "test", &task("app", &[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The container 'ghost' referenced by container 'app' does not exist."
        );

        let err = DependencyGraph::build(&cs, "test", &task("nope", &[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The container 'nope' referenced by task 'test' does not exist."
        );
    }

    #[test]
    fn task_without_run_has_no_graph() {
        let cs = containers(vec![container("app", &[])]);
        let err = DependencyGraph::build(&cs, "group", &TaskConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            DependencyResolutionError::TaskHasNoRunConfiguration { .. }
        ));
    }
}
