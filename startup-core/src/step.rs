//! Steps
//!
//! A step is one unit of initialization work: the names it requires, the
//! names it provides, and the callable that turns the former into the
//! latter. Steps are described by an immutable [`StepSpec`], built with
//! [`StepSpec::builder`].
//!
//! Callables never see the execution context itself. They get a
//! [`StepInputs`] holding exactly their declared inputs and hand back a
//! fresh [`StepOutputs`]; the executor is the only writer of the context.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use thiserror::Error;

use crate::error::{Result, StepError};
use crate::name::{collect_names, Name, StepId};
use crate::value::Value;

/// Small inline list of names; most steps declare one or two.
pub type NameList = SmallVec<[Name; 4]>;

/// The callable behind a step.
pub type StepFn = dyn Fn(&StepInputs) -> std::result::Result<StepOutputs, StepError> + Send + Sync;

/// Immutable description of a registered step.
#[derive(Clone)]
pub struct StepSpec {
    id: StepId,
    requires: NameList,
    provides: NameList,
    callable: Arc<StepFn>,
}

impl StepSpec {
    /// Start describing a step with the given identity.
    ///
    /// # Example
    ///
    /// ```
    /// use startup_core::{StepOutputs, StepSpec};
    ///
    /// let step = StepSpec::builder("parse_args")
    ///     .requires(["argv"])
    ///     .provides(["args"])
    ///     .build(|inputs| {
    ///         let argv = inputs.get::<Vec<String>>("argv")?;
    ///         Ok(StepOutputs::new().with("args", argv.len()))
    ///     })
    ///     .unwrap();
    /// assert_eq!(step.id().as_str(), "parse_args");
    /// ```
    pub fn builder(id: impl Into<String>) -> StepBuilder {
        StepBuilder {
            id: id.into(),
            requires: Vec::new(),
            provides: Vec::new(),
        }
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    /// Names this step reads, in declaration order.
    pub fn requires(&self) -> &[Name] {
        &self.requires
    }

    /// Names this step writes, in declaration order.
    pub fn provides(&self) -> &[Name] {
        &self.provides
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.requires.iter().any(|n| n.as_str() == name)
    }

    pub fn is_provided(&self, name: &str) -> bool {
        self.provides.iter().any(|n| n.as_str() == name)
    }

    pub(crate) fn invoke(
        &self,
        inputs: &StepInputs,
    ) -> std::result::Result<StepOutputs, StepError> {
        (self.callable)(inputs)
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("id", &self.id)
            .field("requires", &self.requires)
            .field("provides", &self.provides)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StepSpec`]. Names are validated when the step is built.
#[derive(Debug, Clone)]
pub struct StepBuilder {
    id: String,
    requires: Vec<String>,
    provides: Vec<String>,
}

impl StepBuilder {
    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn provides<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides.extend(names.into_iter().map(Into::into));
        self
    }

    /// Attach the callable and validate every name.
    pub fn build<F>(self, callable: F) -> Result<StepSpec>
    where
        F: Fn(&StepInputs) -> std::result::Result<StepOutputs, StepError> + Send + Sync + 'static,
    {
        Ok(StepSpec {
            id: StepId::new(&self.id)?,
            requires: collect_names(&self.requires)?,
            provides: collect_names(&self.provides)?,
            callable: Arc::new(callable),
        })
    }
}

/// Failure to read a step input. Returned from inside step callables, so
/// it surfaces as the source of an execution error.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("step '{step}' did not declare input '{name}'")]
    Undeclared { step: StepId, name: String },

    #[error("input '{name}' holds {actual}, not {expected}")]
    TypeMismatch {
        name: Name,
        expected: &'static str,
        actual: &'static str,
    },
}

/// The declared inputs of one step invocation.
#[derive(Debug, Clone)]
pub struct StepInputs {
    step: StepId,
    values: IndexMap<Name, Value>,
}

impl StepInputs {
    pub(crate) fn new(step: StepId, values: IndexMap<Name, Value>) -> Self {
        Self { step, values }
    }

    /// Identity of the step being invoked.
    pub fn step(&self) -> &StepId {
        &self.step
    }

    pub fn value(&self, name: &str) -> std::result::Result<&Value, InputError> {
        self.values.get(name).ok_or_else(|| InputError::Undeclared {
            step: self.step.clone(),
            name: name.to_owned(),
        })
    }

    /// Borrow an input as `T`.
    pub fn get<T: Any>(&self, name: &str) -> std::result::Result<&T, InputError> {
        let (key, value) = self
            .values
            .get_key_value(name)
            .ok_or_else(|| InputError::Undeclared {
                step: self.step.clone(),
                name: name.to_owned(),
            })?;
        value.downcast_ref::<T>().ok_or_else(|| InputError::TypeMismatch {
            name: key.clone(),
            expected: type_name::<T>(),
            actual: value.type_name(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Values a step hands back, keyed by the names it provides.
#[derive(Debug, Clone, Default)]
pub struct StepOutputs {
    values: IndexMap<String, Value>,
}

impl StepOutputs {
    /// Outputs of a step that provides nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.insert(name, Value::new(value));
        self
    }

    /// Set an output, replacing an earlier value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn into_inner(self) -> IndexMap<String, Value> {
        self.values
    }
}
