//! Dependency Graph
//!
//! This module derives the step dependency graph from a frozen registry
//! and computes execution orders over it.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Nodes are registered steps, addressed by registration index
//! - Edges run from the step providing a name to every step requiring it
//!
//! [`GraphBuilder`] constructs and validates the graph (missing and
//! ambiguous producers). [`Resolver`] orders it, or the minimal part of it
//! a request needs, and rejects cycles.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a `Vec` indexed by registration order, so the index is
//!    both the lookup key and the scheduling priority.
//!
//! 2. We keep both forward (dependencies) and reverse (dependents) edges:
//!    Kahn's algorithm walks dependents, ancestor selection walks
//!    dependencies.
//!
//! 3. The graph is rebuilt for every pass. It depends on the root names the
//!    caller supplies, and building it is linear in the declarations.

mod builder;
mod node;
mod resolver;

pub use builder::{DependencyGraph, GraphBuilder};
pub use node::StepNode;
pub use resolver::{ExecutionPlan, PlannedStep, Request, Resolver};
