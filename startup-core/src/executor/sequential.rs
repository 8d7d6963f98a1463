//! Sequential execution in plan order on the calling thread.

use tracing::{debug, warn};

use crate::error::{ExecutionError, Result};
use crate::graph::ExecutionPlan;

use super::{check_outputs, gather_inputs, invoke, ExecutionContext};

pub(super) fn run(plan: &ExecutionPlan, mut context: ExecutionContext) -> Result<ExecutionContext> {
    for (position, step) in plan.steps().iter().enumerate() {
        let inputs = gather_inputs(step, |name| context.get(name).cloned())?;

        debug!(step = %step.id(), position, "invoking step");
        let outputs = match invoke(step.spec(), &inputs) {
            Ok(outputs) => outputs,
            Err(source) => {
                warn!(step = %step.id(), error = %source, "step failed, halting pass");
                return Err(ExecutionError::new(step.id().clone(), source, context).into());
            }
        };

        let bound = match check_outputs(step.spec(), outputs) {
            Ok(bound) => bound,
            Err(mismatch) => {
                warn!(step = %step.id(), ?mismatch, "step returned undeclared outputs");
                return Err(mismatch.into_error(step.id().clone(), context));
            }
        };
        for (name, value) in bound {
            debug!(step = %step.id(), name = %name, "bound output");
            context.bind(name, value)?;
        }
    }
    Ok(context)
}
