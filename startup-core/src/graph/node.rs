//! Graph Nodes
//!
//! This module defines the node type that lives in the dependency graph.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::name::StepId;
use crate::step::StepSpec;

/// Sorted, duplicate-free list of registration indices.
pub type IndexList = SmallVec<[usize; 4]>;

fn insert_sorted(list: &mut IndexList, index: usize) {
    if let Err(at) = list.binary_search(&index) {
        list.insert(at, index);
    }
}

/// A step in the dependency graph.
///
/// Nodes are addressed by the step's registration index, which doubles as
/// its scheduling priority.
#[derive(Debug, Clone)]
pub struct StepNode {
    /// Registration index of the step.
    index: usize,

    spec: Arc<StepSpec>,

    /// Steps this step reads from (producers of its inputs).
    dependencies: IndexList,

    /// Steps that read from this step.
    dependents: IndexList,
}

impl StepNode {
    pub(crate) fn new(index: usize, spec: Arc<StepSpec>) -> Self {
        Self {
            index,
            spec,
            dependencies: IndexList::new(),
            dependents: IndexList::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> &StepId {
        self.spec.id()
    }

    pub fn spec(&self) -> &Arc<StepSpec> {
        &self.spec
    }

    pub(crate) fn add_dependency(&mut self, index: usize) {
        insert_sorted(&mut self.dependencies, index);
    }

    pub(crate) fn add_dependent(&mut self, index: usize) {
        insert_sorted(&mut self.dependents, index);
    }

    /// Registration indices of the steps this step depends on, ascending.
    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    /// Registration indices of the steps depending on this step, ascending.
    pub fn dependents(&self) -> &[usize] {
        &self.dependents
    }

    /// True if the step consumes one of its own outputs.
    pub fn is_self_dependent(&self) -> bool {
        self.dependencies.binary_search(&self.index).is_ok()
    }
}
