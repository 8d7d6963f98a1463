//! Executor
//!
//! Runs an execution plan against a fresh [`ExecutionContext`].
//!
//! Each planned step is invoked exactly once. Its declared inputs are read
//! from the context, its outputs are checked against its declaration and
//! bound into the context. The first failing step stops the pass: nothing
//! after it is scheduled, nothing before it is rolled back.
//!
//! Two strategies share that contract:
//!
//! - sequential: plan order on the calling thread (the default)
//! - parallel: a bounded pool of scoped worker threads, starting every
//!   step as soon as its producers have finished

mod context;
mod parallel;
mod sequential;

pub use context::{ExecutionContext, Inputs};

use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};

use indexmap::IndexMap;
use tracing::Span;

use crate::config::ExecutionMode;
use crate::error::{Error, Result, StepError};
use crate::graph::{ExecutionPlan, PlannedStep};
use crate::name::{Name, StepId};
use crate::step::{StepInputs, StepOutputs, StepSpec};
use crate::value::Value;

/// Executes plans with a fixed strategy.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    mode: ExecutionMode,
}

impl Executor {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    /// Run every step of `plan`, seeding the context with `inputs`.
    ///
    /// For a partial request the returned context holds only the root
    /// inputs the plan consumed plus the requested names.
    pub fn execute(&self, plan: &ExecutionPlan, inputs: Inputs) -> Result<ExecutionContext> {
        let context = inputs.into_context();
        let context = match self.mode {
            ExecutionMode::Sequential => sequential::run(plan, context)?,
            ExecutionMode::Parallel { workers } => {
                let workers = NonZeroUsize::new(workers).ok_or_else(|| Error::InvalidConfig {
                    reason: "parallel execution needs at least one worker".to_owned(),
                })?;
                parallel::run(plan, context, workers, &Span::current())?
            }
        };

        Ok(match plan.request().names() {
            None => context,
            Some(requested) => context.project(|name| {
                requested.contains(name) || plan.consumed_roots().contains(name)
            }),
        })
    }
}

/// Read a step's declared inputs.
///
/// A valid plan binds every input before its consumer runs, so a miss here
/// is an invariant violation, not a user error.
fn gather_inputs(step: &PlannedStep, lookup: impl Fn(&str) -> Option<Value>) -> Result<StepInputs> {
    let mut values = IndexMap::with_capacity(step.spec().requires().len());
    for name in step.spec().requires() {
        let value = lookup(name.as_str()).ok_or_else(|| {
            Error::Invariant(format!(
                "input '{name}' of step '{}' is not bound",
                step.id()
            ))
        })?;
        values.insert(name.clone(), value);
    }
    Ok(StepInputs::new(step.id().clone(), values))
}

/// Call the step, turning a panic into an ordinary step failure.
fn invoke(spec: &StepSpec, inputs: &StepInputs) -> std::result::Result<StepOutputs, StepError> {
    match catch_unwind(AssertUnwindSafe(|| spec.invoke(inputs))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            Err(format!("step panicked: {message}").into())
        }
    }
}

/// Outputs a step returned that differ from its declaration.
#[derive(Debug)]
struct OutputMismatch {
    missing: Vec<Name>,
    undeclared: Vec<String>,
}

impl OutputMismatch {
    fn into_error(self, step: StepId, context: ExecutionContext) -> Error {
        Error::OutputMismatch {
            step,
            missing: self.missing,
            undeclared: self.undeclared,
            context: Box::new(context),
        }
    }
}

/// Match returned outputs against the declaration, in declaration order.
fn check_outputs(
    spec: &StepSpec,
    outputs: StepOutputs,
) -> std::result::Result<Vec<(Name, Value)>, OutputMismatch> {
    let mut returned = outputs.into_inner();
    let mut bound = Vec::with_capacity(spec.provides().len());
    let mut missing = Vec::new();

    for name in spec.provides() {
        match returned.shift_remove(name.as_str()) {
            Some(value) => bound.push((name.clone(), value)),
            None => missing.push(name.clone()),
        }
    }

    if missing.is_empty() && returned.is_empty() {
        return Ok(bound);
    }
    Err(OutputMismatch {
        missing,
        undeclared: returned.into_keys().collect(),
    })
}
