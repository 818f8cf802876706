// src/dag/mod.rs

//! Container dependency graph for a single task.
//!
//! - [`graph`] resolves the task container and its (transitive) dependencies
//!   into an immutable, validated graph.
//! - [`node`] is one container within that graph.
//! - [`errors`] describes why resolution failed (cycles, missing containers).

pub mod errors;
pub mod graph;
pub mod node;

pub use errors::DependencyResolutionError;
pub use graph::DependencyGraph;
pub use node::DependencyGraphNode;
