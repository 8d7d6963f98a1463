//! Graph Construction
//!
//! Derives the dependency graph from a frozen registry: an edge runs from
//! the step providing a name to every step requiring it. Names supplied by
//! the caller ("roots") are always-satisfied sources with no producer.

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{Error, Result};
use crate::name::{Name, StepId};
use crate::registry::FrozenRegistry;

use super::node::{IndexList, StepNode};

/// Read-only dependency graph over a frozen registry.
///
/// Never mutated once built; a different registry or root set means
/// building a new graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Indexed by registration order.
    nodes: Vec<StepNode>,

    /// The unique producer of each provided name.
    producers: IndexMap<Name, usize>,

    /// Names supplied by the caller.
    roots: IndexSet<Name>,

    /// Required names with neither a producer nor a root, and who needs them.
    unsatisfied: IndexMap<Name, IndexList>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&StepNode> {
        self.nodes.get(index)
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    /// Registration index of the step that provides `name`.
    pub fn producer_of(&self, name: &str) -> Option<usize> {
        self.producers.get(name).copied()
    }

    pub fn roots(&self) -> &IndexSet<Name> {
        &self.roots
    }

    pub fn is_root(&self, name: &str) -> bool {
        self.roots.contains(name)
    }

    /// Fail with the first unsatisfied requirement among the selected steps.
    ///
    /// Requirements are reported in the order they were first seen; the
    /// error lists only the selected steps that need the name.
    pub fn check_satisfied(&self, selected: impl Fn(usize) -> bool) -> Result<()> {
        for (name, requiring) in &self.unsatisfied {
            let steps: Vec<StepId> = requiring
                .iter()
                .copied()
                .filter(|&index| selected(index))
                .map(|index| self.nodes[index].id().clone())
                .collect();
            if !steps.is_empty() {
                return Err(Error::MissingDependency {
                    name: name.clone(),
                    steps,
                });
            }
        }
        Ok(())
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|node| node.dependents().len()).sum()
    }
}

/// Builds a [`DependencyGraph`] from a frozen registry and a root set.
#[derive(Debug)]
pub struct GraphBuilder<'r> {
    registry: &'r FrozenRegistry,
    roots: IndexSet<Name>,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(registry: &'r FrozenRegistry) -> Self {
        Self {
            registry,
            roots: IndexSet::new(),
        }
    }

    /// Declare names the caller will supply.
    pub fn roots<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = Name>,
    {
        self.roots.extend(names);
        self
    }

    /// Build and validate the whole graph.
    ///
    /// Fails on an ambiguous producer, on a root that shadows a produced
    /// name, or on any requirement that nothing satisfies.
    pub fn build(self) -> Result<DependencyGraph> {
        let graph = self.assemble()?;
        graph.check_satisfied(|_| true)?;
        Ok(graph)
    }

    /// Build the graph without checking that every requirement is met.
    ///
    /// Used when only part of the graph will be scheduled; the resolver
    /// then checks satisfiability for the steps it selects.
    pub fn assemble(self) -> Result<DependencyGraph> {
        let steps = self.registry.steps();

        let mut providers: IndexMap<Name, SmallVec<[usize; 1]>> = IndexMap::new();
        for (index, spec) in steps.iter().enumerate() {
            for name in spec.provides() {
                providers.entry(name.clone()).or_default().push(index);
            }
        }

        // The registry already refuses these; re-checked so the builder
        // does not depend on how the registry was populated.
        let mut producers = IndexMap::with_capacity(providers.len());
        for (name, indices) in providers {
            if indices.len() > 1 {
                return Err(Error::AmbiguousProducer {
                    name,
                    steps: indices.iter().map(|&i| steps[i].id().clone()).collect(),
                });
            }
            producers.insert(name, indices[0]);
        }

        for root in &self.roots {
            if let Some(&producer) = producers.get(root) {
                return Err(Error::ConflictingInput {
                    name: root.clone(),
                    producer: steps[producer].id().clone(),
                });
            }
        }

        let mut nodes: Vec<StepNode> = steps
            .iter()
            .enumerate()
            .map(|(index, spec)| StepNode::new(index, spec.clone()))
            .collect();
        let mut unsatisfied: IndexMap<Name, IndexList> = IndexMap::new();

        for (consumer, spec) in steps.iter().enumerate() {
            for name in spec.requires() {
                if let Some(&producer) = producers.get(name) {
                    nodes[producer].add_dependent(consumer);
                    nodes[consumer].add_dependency(producer);
                } else if !self.roots.contains(name) {
                    unsatisfied.entry(name.clone()).or_default().push(consumer);
                }
            }
        }

        let graph = DependencyGraph {
            nodes,
            producers,
            roots: self.roots,
            unsatisfied,
        };
        debug!(
            steps = graph.len(),
            edges = graph.edge_count(),
            roots = graph.roots.len(),
            unsatisfied = graph.unsatisfied.len(),
            "assembled dependency graph"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::step::{StepOutputs, StepSpec};

    fn step(id: &str, requires: &[&str], provides: &[&str]) -> StepSpec {
        StepSpec::builder(id)
            .requires(requires.iter().copied())
            .provides(provides.iter().copied())
            .build(|_| Ok(StepOutputs::new()))
            .unwrap()
    }

    fn frozen(steps: Vec<StepSpec>) -> FrozenRegistry {
        let mut registry = Registry::new();
        for spec in steps {
            registry.register(spec).unwrap();
        }
        registry.freeze()
    }

    fn names(raw: &[&str]) -> Vec<Name> {
        raw.iter().map(|n| Name::new(n).unwrap()).collect()
    }

    #[test]
    fn edges_run_from_producer_to_consumers() {
        let registry = frozen(vec![
            step("parse_args", &["argv"], &["args"]),
            step("read_config", &["args"], &["config"]),
            step("log_args", &["args"], &[]),
        ]);

        let graph = GraphBuilder::new(&registry)
            .roots(names(&["argv"]))
            .build()
            .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.node(0).unwrap().dependents(), &[1, 2]);
        assert_eq!(graph.node(1).unwrap().dependencies(), &[0]);
        assert!(graph.node(0).unwrap().dependencies().is_empty());
        assert_eq!(graph.producer_of("config"), Some(1));
        assert_eq!(graph.producer_of("argv"), None);
        assert!(graph.is_root("argv"));
    }

    #[test]
    fn missing_producer_names_every_consumer() {
        let registry = frozen(vec![
            step("parse_args", &["argv"], &["args"]),
            step("echo_argv", &["argv"], &[]),
        ]);

        let err = GraphBuilder::new(&registry).build().unwrap_err();
        match err {
            Error::MissingDependency { name, steps } => {
                assert_eq!(name.as_str(), "argv");
                let ids: Vec<&str> = steps.iter().map(StepId::as_str).collect();
                assert_eq!(ids, vec!["parse_args", "echo_argv"]);
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }
    }

    #[test]
    fn assemble_defers_satisfiability() {
        let registry = frozen(vec![
            step("a", &[], &["x"]),
            step("b", &["x", "nowhere"], &["y"]),
        ]);

        let graph = GraphBuilder::new(&registry).assemble().unwrap();
        assert!(graph.check_satisfied(|index| index == 0).is_ok());
        assert!(matches!(
            graph.check_satisfied(|index| index == 1),
            Err(Error::MissingDependency { .. })
        ));
    }

    #[test]
    fn ambiguous_producers_are_rejected() {
        let registry = FrozenRegistry::unchecked(vec![
            step("env_config", &[], &["config"]),
            step("file_config", &[], &["config"]),
        ]);

        match GraphBuilder::new(&registry).build().unwrap_err() {
            Error::AmbiguousProducer { name, steps } => {
                assert_eq!(name.as_str(), "config");
                let ids: Vec<&str> = steps.iter().map(StepId::as_str).collect();
                assert_eq!(ids, vec!["env_config", "file_config"]);
            }
            other => panic!("expected AmbiguousProducer, got {other:?}"),
        }
    }

    #[test]
    fn roots_must_not_shadow_outputs() {
        let registry = frozen(vec![step("parse_args", &["argv"], &["args"])]);

        let err = GraphBuilder::new(&registry)
            .roots(names(&["argv", "args"]))
            .build()
            .unwrap_err();
        match err {
            Error::ConflictingInput { name, producer } => {
                assert_eq!(name.as_str(), "args");
                assert_eq!(producer.as_str(), "parse_args");
            }
            other => panic!("expected ConflictingInput, got {other:?}"),
        }
    }

    #[test]
    fn self_consuming_step_gets_a_loop_edge() {
        let registry = frozen(vec![step("loop", &["x"], &["x"])]);
        let graph = GraphBuilder::new(&registry).build().unwrap();
        assert!(graph.node(0).unwrap().is_self_dependent());
    }

    #[test]
    fn empty_registry_builds_an_empty_graph() {
        let registry = frozen(Vec::new());
        let graph = GraphBuilder::new(&registry).build().unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.edge_count(), 0);
    }
}
