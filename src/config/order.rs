// src/config/order.rs

//! Prerequisite resolution: which tasks run, and in which order, when a
//! task is requested.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use crate::config::model::{ConfigFile, TaskConfig};
use crate::errors::{Result, TaskpodError};

/// The requested task's prerequisites (transitively, each once, deepest
/// first) followed by the task itself.
pub fn execution_order(cfg: &ConfigFile, task_name: &str) -> Result<Vec<String>> {
    resolve_execution_order(&cfg.task, task_name)
}

pub(crate) fn resolve_execution_order(
    tasks: &BTreeMap<String, TaskConfig>,
    task_name: &str,
) -> Result<Vec<String>> {
    if !tasks.contains_key(task_name) {
        return Err(TaskpodError::TaskNotFound(task_name.to_string()));
    }

    let mut path = Vec::new();
    let mut order = Vec::new();
    visit(tasks, task_name, &mut path, &mut order)?;

    debug!(task = %task_name, ?order, "resolved task execution order");
    Ok(order)
}

fn visit(
    tasks: &BTreeMap<String, TaskConfig>,
    name: &str,
    path: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<()> {
    if order.iter().any(|done| done == name) {
        return Ok(());
    }

    if let Some(start) = path.iter().position(|p| p == name) {
        return Err(TaskpodError::PrerequisiteCycle(describe_cycle(
            &path[start..],
            name,
        )));
    }

    path.push(name.to_string());
    for prerequisite in expand_prerequisites(tasks, name)? {
        visit(tasks, &prerequisite, path, order)?;
    }
    path.pop();

    order.push(name.to_string());
    Ok(())
}

fn describe_cycle(chain: &[String], repeated: &str) -> String {
    let mut names = chain.iter().map(String::as_str).chain(std::iter::once(repeated));
    let first = names.next().unwrap_or(repeated);
    let second = names.next().unwrap_or(repeated);

    let mut description = format!(
        "There is a dependency cycle between tasks: task '{first}' has '{second}' as a prerequisite"
    );
    for next in names {
        description.push_str(&format!(", which has '{next}' as a prerequisite"));
    }
    description.push('.');
    description
}

/// Expand the `prerequisites` of `task_name`, resolving `*` wildcards
/// against all task names (in name order).
///
/// A wildcard never matches the task itself.
pub(crate) fn expand_prerequisites(
    tasks: &BTreeMap<String, TaskConfig>,
    task_name: &str,
) -> Result<Vec<String>> {
    let task = tasks
        .get(task_name)
        .ok_or_else(|| TaskpodError::TaskNotFound(task_name.to_string()))?;

    let mut expanded: Vec<String> = Vec::new();

    for pattern in task.prerequisites.iter() {
        if pattern.contains('*') {
            let re = wildcard_regex(pattern)?;
            let matches: Vec<&String> = tasks
                .keys()
                .filter(|candidate| candidate.as_str() != task_name && re.is_match(candidate))
                .collect();

            if matches.is_empty() {
                return Err(TaskpodError::ConfigError(format!(
                    "prerequisite '{pattern}' of task '{task_name}' does not match any task"
                )));
            }

            for name in matches {
                if !expanded.contains(name) {
                    expanded.push(name.clone());
                }
            }
        } else {
            if pattern == task_name {
                return Err(TaskpodError::ConfigError(format!(
                    "task '{task_name}' cannot be a prerequisite of itself"
                )));
            }
            if !tasks.contains_key(pattern) {
                return Err(TaskpodError::ConfigError(format!(
                    "task '{task_name}' has unknown prerequisite '{pattern}'"
                )));
            }
            if !expanded.contains(pattern) {
                expanded.push(pattern.clone());
            }
        }
    }

    Ok(expanded)
}

fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let source = format!("^{}$", escaped.join(".*"));
    Regex::new(&source).map_err(|e| {
        TaskpodError::ConfigError(format!("invalid prerequisite pattern '{pattern}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(entries: &[(&str, &[&str])]) -> BTreeMap<String, TaskConfig> {
        entries
            .iter()
            .map(|(name, prerequisites)| {
                (
                    name.to_string(),
                    TaskConfig {
                        prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn prerequisites_come_first_and_only_once() {
        let tasks = tasks(&[
            ("build", &[]),
            ("lint", &["build"]),
            ("test", &["build", "lint"]),
        ]);

        let order = resolve_execution_order(&tasks, "test").unwrap();
        assert_eq!(order, vec!["build", "lint", "test"]);
    }

    #[test]
    fn wildcards_expand_in_name_order_and_skip_self() {
        let tasks = tasks(&[
            ("lint:rust", &[]),
            ("lint:docs", &[]),
            ("lint:all", &["lint:*"]),
        ]);

        let expanded = expand_prerequisites(&tasks, "lint:all").unwrap();
        assert_eq!(expanded, vec!["lint:docs", "lint:rust"]);
    }

    #[test]
    fn wildcard_matching_nothing_is_an_error() {
        let tasks = tasks(&[("test", &["setup:*"])]);
        assert!(matches!(
            expand_prerequisites(&tasks, "test"),
            Err(TaskpodError::ConfigError(msg)) if msg.contains("does not match any task")
        ));
    }

    #[test]
    fn cycle_message_lists_whole_chain() {
        let tasks = tasks(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);

        match resolve_execution_order(&tasks, "a") {
            Err(TaskpodError::PrerequisiteCycle(msg)) => assert_eq!(
                msg,
                "There is a dependency cycle between tasks: task 'a' has 'b' as a prerequisite, \
                 which has 'c' as a prerequisite, which has 'a' as a prerequisite."
            ),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_task_is_reported() {
        let tasks = tasks(&[("a", &[])]);
        assert!(matches!(
            resolve_execution_order(&tasks, "nope"),
            Err(TaskpodError::TaskNotFound(name)) if name == "nope"
        ));
    }
}
