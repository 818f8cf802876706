// tests/graph_properties.rs

mod common;

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use taskpod::config::ConfigFile;
use taskpod::engine::{CancellationSource, FAILURE_EXIT_CODE};
use taskpod::types::CleanupBehaviour;
use taskpod_test_utils::builders::{ConfigFileBuilder, ContainerConfigBuilder, TaskConfigBuilder};
use taskpod_test_utils::{FakeContainerEngine, FakeOperation as Op};

/// A random acyclic container graph.
///
/// Container `cN` may only depend on `c0..cN-1`, and the last container is
/// the task container, with every other container as a task dependency so
/// all of them take part.
fn container_graph_strategy(
    max_containers: usize,
) -> impl Strategy<Value = (ConfigFile, BTreeMap<String, BTreeSet<String>>)> {
    (2..=max_containers).prop_flat_map(|count| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), count).prop_map(
            move |raw_deps| {
                let mut builder = ConfigFileBuilder::new();
                let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

                for (i, potential) in raw_deps.into_iter().enumerate() {
                    let name = format!("c{i}");
                    let mut container = ContainerConfigBuilder::image(&format!("image-{i}"));
                    let mut own = BTreeSet::new();
                    if i > 0 {
                        for dep in potential {
                            own.insert(format!("c{}", dep % i));
                        }
                    }
                    for dep in &own {
                        container = container.depends_on(dep);
                    }
                    deps.insert(name.clone(), own);
                    builder = builder.with_container(&name, container.build());
                }

                let root = format!("c{}", count - 1);
                let mut task = TaskConfigBuilder::run(&root);
                for i in 0..count - 1 {
                    let name = format!("c{i}");
                    if !deps[&root].contains(&name) {
                        task = task.dependency(&name);
                    }
                }
                deps.get_mut(&root)
                    .expect("root exists")
                    .extend((0..count - 1).map(|i| format!("c{i}")));

                (builder.with_task("t", task.build()).build(), deps)
            },
        )
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_container_starts_after_its_dependencies_and_is_removed(
        (cfg, deps) in container_graph_strategy(7),
        workers in 1usize..5,
    ) {
        let outcome = runtime().block_on(common::run_with(
            &cfg,
            "t",
            FakeContainerEngine::new(),
            CleanupBehaviour::Cleanup,
            workers,
            CancellationSource::never(),
        )).unwrap();
        let engine = &outcome.engine;

        prop_assert_eq!(outcome.exit_code, 0);
        prop_assert!(engine.max_in_flight() <= workers);

        for (name, own) in &deps {
            let started = engine
                .position(Op::StartContainer, name)
                .or_else(|| engine.position(Op::RunContainer, name));
            prop_assert!(started.is_some(), "{} never started", name);
            for dep in own {
                let healthy = engine.position(Op::WaitForHealth, dep);
                prop_assert!(
                    healthy.is_some() && healthy < started,
                    "{} started before {} was healthy",
                    name,
                    dep
                );
            }
        }

        let mut removed = engine.targets(Op::RemoveContainer);
        removed.sort();
        let expected: Vec<String> = deps.keys().cloned().collect();
        prop_assert_eq!(removed, expected);
        prop_assert_eq!(engine.targets(Op::DeleteNetwork).len(), 1);
    }

    #[test]
    fn any_start_failure_cleans_up_every_created_container(
        (cfg, deps) in container_graph_strategy(6),
        victim in any::<prop::sample::Index>(),
        workers in 1usize..4,
    ) {
        // The root is run, not started, so pick among the others.
        let root = format!("c{}", deps.len() - 1);
        let candidates: Vec<&String> = deps.keys().filter(|n| **n != root).collect();
        let victim = victim.get(&candidates).to_string();

        let engine = FakeContainerEngine::new().fail(Op::StartContainer, &victim, "boom");
        let outcome = runtime().block_on(common::run_with(
            &cfg,
            "t",
            engine,
            CleanupBehaviour::Cleanup,
            workers,
            CancellationSource::never(),
        )).unwrap();
        let engine = &outcome.engine;

        prop_assert_eq!(outcome.exit_code, FAILURE_EXIT_CODE);
        prop_assert!(engine.targets(Op::RunContainer).is_empty());

        let mut created = engine.targets(Op::CreateContainer);
        let mut removed = engine.targets(Op::RemoveContainer);
        created.sort();
        removed.sort();
        prop_assert_eq!(created, removed);
        prop_assert_eq!(engine.targets(Op::DeleteNetwork).len(), 1);
        prop_assert_eq!(outcome.logger.failures().len(), 1);
    }
}
