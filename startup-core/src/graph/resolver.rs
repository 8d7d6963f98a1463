//! Resolver
//!
//! Turns a dependency graph into an execution plan.
//!
//! # Algorithm
//!
//! 1. Select the steps to run: every step, or for a partial request only
//!    the ancestors of the steps providing the requested names (reverse
//!    reachability over dependency edges).
//! 2. Check that every selected step's requirements are satisfiable.
//! 3. Order the selection with Kahn's algorithm. The ready set is a
//!    min-heap keyed by registration index, so whenever several steps are
//!    runnable the earliest-registered one goes first. The order depends
//!    only on the registration order and the graph.
//! 4. If the ready set drains while selected steps remain, those steps
//!    contain a cycle. A breadth-first search over the leftovers finds the
//!    shortest one to report.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::debug;

use crate::error::{Error, Result};
use crate::name::{Name, StepId};
use crate::step::StepSpec;

use super::builder::DependencyGraph;
use super::node::IndexList;

/// Which outputs a pass should produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Request {
    /// Run every registered step.
    #[default]
    All,
    /// Run only what these names need.
    Outputs(IndexSet<Name>),
}

impl Request {
    /// Request a subset of outputs by name.
    pub fn outputs<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(Name::new)
            .collect::<Result<IndexSet<_>>>()?;
        Ok(Self::Outputs(names))
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// The requested names, if this is a partial request.
    pub fn names(&self) -> Option<&IndexSet<Name>> {
        match self {
            Self::All => None,
            Self::Outputs(names) => Some(names),
        }
    }
}

/// One step of an execution plan.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    spec: Arc<StepSpec>,
    registration_index: usize,
    /// Plan positions of the steps this one waits for.
    dependencies: IndexList,
    /// Plan positions of the steps waiting for this one.
    dependents: IndexList,
}

impl PlannedStep {
    pub fn spec(&self) -> &Arc<StepSpec> {
        &self.spec
    }

    pub fn id(&self) -> &StepId {
        self.spec.id()
    }

    pub fn registration_index(&self) -> usize {
        self.registration_index
    }

    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &[usize] {
        &self.dependents
    }
}

/// Ordered steps for one pass, plus what they need from the caller.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    steps: Vec<PlannedStep>,
    /// Root names the planned steps consume.
    roots: IndexSet<Name>,
    request: Request,
}

impl ExecutionPlan {
    /// Steps in execution order.
    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.iter().map(PlannedStep::id)
    }

    pub fn consumed_roots(&self) -> &IndexSet<Name> {
        &self.roots
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, step) in self.steps.iter().enumerate() {
            write!(f, "{:>3}. {}", position + 1, step.id())?;
            let spec = step.spec();
            if !spec.requires().is_empty() {
                write!(f, " <- {}", list(spec.requires()))?;
            }
            if !spec.provides().is_empty() {
                write!(f, " -> {}", list(spec.provides()))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn list(names: &[Name]) -> String {
    names
        .iter()
        .map(Name::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Serialize for PlannedStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PlannedStep", 4)?;
        state.serialize_field("id", self.id())?;
        state.serialize_field("requires", self.spec.requires())?;
        state.serialize_field("provides", self.spec.provides())?;
        state.serialize_field("after", self.dependencies.as_slice())?;
        state.end()
    }
}

impl Serialize for ExecutionPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ExecutionPlan", 3)?;
        state.serialize_field("steps", &self.steps)?;
        state.serialize_field("roots", &self.roots)?;
        state.serialize_field("requested", &self.request.names())?;
        state.end()
    }
}

/// Computes execution plans over a dependency graph.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'g> {
    graph: &'g DependencyGraph,
}

impl<'g> Resolver<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self { graph }
    }

    /// Compute the plan for `request`.
    pub fn resolve(&self, request: &Request) -> Result<ExecutionPlan> {
        let selected = self.select(request)?;
        self.graph.check_satisfied(|index| selected[index])?;

        let order = self.topological_sort(&selected)?;
        let plan = self.assemble_plan(order, request.clone());
        debug!(
            steps = plan.len(),
            skipped = self.graph.len() - plan.len(),
            "resolved execution order"
        );
        Ok(plan)
    }

    /// Mark the steps the request needs.
    fn select(&self, request: &Request) -> Result<Vec<bool>> {
        let names = match request {
            Request::All => return Ok(vec![true; self.graph.len()]),
            Request::Outputs(names) => names,
        };

        let mut selected = vec![false; self.graph.len()];
        let mut stack = Vec::new();
        for name in names {
            match self.graph.producer_of(name.as_str()) {
                Some(index) => stack.push(index),
                None if self.graph.is_root(name.as_str()) => {}
                None => return Err(Error::UnknownOutput { name: name.clone() }),
            }
        }

        while let Some(index) = stack.pop() {
            if std::mem::replace(&mut selected[index], true) {
                continue;
            }
            stack.extend(self.graph.nodes()[index].dependencies().iter().copied());
        }
        Ok(selected)
    }

    /// Kahn's algorithm restricted to the selected nodes.
    fn topological_sort(&self, selected: &[bool]) -> Result<Vec<usize>> {
        let nodes = self.graph.nodes();
        let mut in_degree = vec![0_usize; nodes.len()];
        let mut ready = BinaryHeap::new();
        let mut remaining = 0;

        for node in nodes.iter().filter(|node| selected[node.index()]) {
            remaining += 1;
            let degree = node
                .dependencies()
                .iter()
                .filter(|&&dep| selected[dep])
                .count();
            in_degree[node.index()] = degree;
            if degree == 0 {
                ready.push(Reverse(node.index()));
            }
        }

        let mut order = Vec::with_capacity(remaining);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &dependent in nodes[index].dependents() {
                if !selected[dependent] {
                    continue;
                }
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() == remaining {
            return Ok(order);
        }

        let mut residual = selected.to_vec();
        for &index in &order {
            residual[index] = false;
        }
        match self.shortest_cycle(&residual) {
            Some(cycle) => Err(Error::Cycle {
                cycle: cycle
                    .into_iter()
                    .map(|index| nodes[index].id().clone())
                    .collect(),
            }),
            None => Err(Error::Invariant(
                "topological sort stalled without a cycle".to_owned(),
            )),
        }
    }

    /// Shortest cycle among the residual nodes.
    ///
    /// Breadth-first from each residual node in registration order; ties go
    /// to the cycle through the earliest-registered step, which is listed
    /// first.
    fn shortest_cycle(&self, residual: &[bool]) -> Option<Vec<usize>> {
        let nodes = self.graph.nodes();
        let mut best: Option<Vec<usize>> = None;

        for start in (0..nodes.len()).filter(|&index| residual[index]) {
            if nodes[start].is_self_dependent() {
                return Some(vec![start]);
            }

            let mut parent: Vec<Option<usize>> = vec![None; nodes.len()];
            let mut seen = vec![false; nodes.len()];
            let mut queue = VecDeque::from([start]);
            seen[start] = true;

            let mut closing = None;
            'search: while let Some(current) = queue.pop_front() {
                for &next in nodes[current].dependents() {
                    if !residual[next] {
                        continue;
                    }
                    if next == start {
                        closing = Some(current);
                        break 'search;
                    }
                    if !seen[next] {
                        seen[next] = true;
                        parent[next] = Some(current);
                        queue.push_back(next);
                    }
                }
            }

            let Some(mut cursor) = closing else {
                continue;
            };
            let mut path = vec![cursor];
            while let Some(previous) = parent[cursor] {
                path.push(previous);
                cursor = previous;
            }
            path.reverse();

            if best.as_ref().map_or(true, |current| path.len() < current.len()) {
                best = Some(path);
            }
        }
        best
    }

    fn assemble_plan(&self, order: Vec<usize>, request: Request) -> ExecutionPlan {
        let nodes = self.graph.nodes();
        let mut position = vec![usize::MAX; nodes.len()];
        for (at, &index) in order.iter().enumerate() {
            position[index] = at;
        }

        let mut roots = IndexSet::new();
        let steps = order
            .iter()
            .map(|&index| {
                let node = &nodes[index];
                for name in node.spec().requires() {
                    if self.graph.is_root(name.as_str()) {
                        roots.insert(name.clone());
                    }
                }
                let mut dependencies: IndexList = node
                    .dependencies()
                    .iter()
                    .map(|&dep| position[dep])
                    .filter(|&at| at != usize::MAX)
                    .collect();
                dependencies.sort_unstable();
                let mut dependents: IndexList = node
                    .dependents()
                    .iter()
                    .map(|&dep| position[dep])
                    .filter(|&at| at != usize::MAX)
                    .collect();
                dependents.sort_unstable();
                PlannedStep {
                    spec: node.spec().clone(),
                    registration_index: index,
                    dependencies,
                    dependents,
                }
            })
            .collect();

        ExecutionPlan {
            steps,
            roots,
            request,
        }
    }
}
