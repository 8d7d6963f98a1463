//! Error types
//!
//! Every failure the resolver can report is a variant of [`Error`].
//! Structural problems (duplicates, missing producers, cycles) are all
//! raised before the first step runs; only [`Error::Execution`] and
//! [`Error::OutputMismatch`] can happen once a pass is executing.

use thiserror::Error;

use crate::executor::ExecutionContext;
use crate::name::{Name, StepId};
use crate::pass::PassState;

/// Result type for resolver operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure returned by a step callable.
pub type StepError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn join<T: std::fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

fn cycle_path(cycle: &[StepId]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {first}", join(cycle, " -> ")),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A name or step identity failed validation.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The same step identity was registered twice.
    #[error("step '{step}' is already registered")]
    DuplicateStep { step: StepId },

    /// A step declared an output some other step already provides.
    #[error("output '{name}' of step '{step}' is already provided by step '{existing}'")]
    DuplicateOutput {
        name: Name,
        step: StepId,
        existing: StepId,
    },

    /// Registration was attempted after the registry was frozen.
    #[error("registry is frozen, cannot register step '{step}'")]
    RegistryFrozen { step: StepId },

    /// A required input has no producer and was not supplied by the caller.
    #[error("missing dependency '{name}' required by {}", join(.steps, ", "))]
    MissingDependency { name: Name, steps: Vec<StepId> },

    /// More than one step produces the same name.
    #[error("output '{name}' has several producers: {}", join(.steps, ", "))]
    AmbiguousProducer { name: Name, steps: Vec<StepId> },

    /// The graph, or the requested part of it, is not acyclic.
    #[error("dependency cycle: {}", cycle_path(.cycle))]
    Cycle { cycle: Vec<StepId> },

    /// An initial input shadows a name that a step produces.
    #[error("initial input '{name}' is also provided by step '{producer}'")]
    ConflictingInput { name: Name, producer: StepId },

    /// A requested name is neither produced nor supplied.
    #[error("requested output '{name}' is not produced by any step nor supplied as an input")]
    UnknownOutput { name: Name },

    /// A step returned a different set of outputs than it declared.
    #[error(
        "step '{step}' returned outputs that do not match its declaration \
         (missing: [{}], undeclared: [{}])",
        join(.missing, ", "),
        join(.undeclared, ", ")
    )]
    OutputMismatch {
        step: StepId,
        missing: Vec<Name>,
        undeclared: Vec<String>,
        /// Context accumulated before the step; nothing it returned is bound.
        context: Box<ExecutionContext>,
    },

    /// A step callable failed.
    #[error(transparent)]
    Execution(Box<ExecutionError>),

    /// Something the graph validation guarantees did not hold.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// The pass stage this kind of error belongs to.
    ///
    /// This is the stage whose check the error fails, which is not always
    /// the state the pass was in. For a partial request the missing
    /// dependency check runs during resolution, once the selected steps
    /// are known, but a [`Error::MissingDependency`] still reports
    /// [`PassState::Building`].
    pub fn stage(&self) -> PassState {
        match self {
            Self::InvalidName { .. }
            | Self::DuplicateStep { .. }
            | Self::DuplicateOutput { .. }
            | Self::RegistryFrozen { .. }
            | Self::MissingDependency { .. }
            | Self::AmbiguousProducer { .. }
            | Self::ConflictingInput { .. }
            | Self::InvalidConfig { .. } => PassState::Building,
            Self::Cycle { .. } | Self::UnknownOutput { .. } => PassState::Validated,
            Self::OutputMismatch { .. } | Self::Execution(_) | Self::Invariant(_) => {
                PassState::Executing
            }
        }
    }

    /// What the context held when execution stopped, for errors raised
    /// while steps were running.
    pub fn partial_context(&self) -> Option<&ExecutionContext> {
        match self {
            Self::Execution(err) => Some(err.partial_context()),
            Self::OutputMismatch { context, .. } => Some(&**context),
            _ => None,
        }
    }

    /// The execution failure, if this is one.
    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            Self::Execution(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Self::Execution(Box::new(err))
    }
}

/// A step callable failed while a pass was executing.
///
/// Carries the failing step, the original failure, and whatever the context
/// held at that point. The context is for diagnostics only; a failed pass
/// cannot be resumed.
#[derive(Debug, Error)]
#[error("step '{step}' failed: {source}")]
pub struct ExecutionError {
    step: StepId,
    #[source]
    source: StepError,
    context: ExecutionContext,
}

impl ExecutionError {
    pub(crate) fn new(step: StepId, source: StepError, context: ExecutionContext) -> Self {
        Self {
            step,
            source,
            context,
        }
    }

    pub fn step(&self) -> &StepId {
        &self.step
    }

    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Context accumulated before the failure.
    pub fn partial_context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn into_parts(self) -> (StepId, StepError, ExecutionContext) {
        (self.step, self.source, self.context)
    }
}
