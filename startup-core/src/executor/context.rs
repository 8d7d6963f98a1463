//! Execution Context
//!
//! The context maps names to values for one pass. It is created fresh for
//! every pass, seeded with the caller's inputs, and grows monotonically as
//! steps complete. Each name is bound at most once.

use std::any::Any;
use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::name::Name;
use crate::value::Value;

/// Values the caller supplies to a pass.
///
/// # Example
///
/// ```
/// use startup_core::Inputs;
///
/// let inputs = Inputs::new()
///     .with("argv", vec!["prog".to_string(), "cfg.yaml".to_string()])
///     .unwrap();
/// assert_eq!(inputs.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: IndexMap<Name, Value>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(mut self, name: impl AsRef<str>, value: T) -> Result<Self>
    where
        T: Any + Send + Sync,
    {
        self.insert(name, Value::new(value))?;
        Ok(self)
    }

    /// Set an input. A later value for the same name replaces the earlier one.
    pub fn insert(&mut self, name: impl AsRef<str>, value: Value) -> Result<()> {
        self.values.insert(Name::new(name)?, value);
        Ok(())
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

    pub(crate) fn into_context(self) -> ExecutionContext {
        ExecutionContext {
            values: self.values,
        }
    }
}

/// Write-once mapping from name to value for a single pass.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    values: IndexMap<Name, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name. Binding a name twice violates the write-once rule.
    pub(crate) fn bind(&mut self, name: Name, value: Value) -> Result<()> {
        match self.values.entry(name) {
            indexmap::map::Entry::Occupied(entry) => Err(Error::Invariant(format!(
                "'{}' is already bound in the execution context",
                entry.key()
            ))),
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Borrow a value as `T`; `None` if unbound or of another type.
    pub fn get_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name)?.downcast_ref::<T>()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Bound names, in binding order.
    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keep only the names `keep` accepts, preserving order.
    pub(crate) fn project(mut self, keep: impl Fn(&Name) -> bool) -> Self {
        self.values.retain(|name, _| keep(name));
        self
    }

    pub fn into_map(self) -> IndexMap<Name, Value> {
        self.values
    }
}

impl IntoIterator for ExecutionContext {
    type Item = (Name, Value);
    type IntoIter = indexmap::map::IntoIter<Name, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.iter().map(|(name, value)| (name.as_str(), value)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> Name {
        Name::new(raw).unwrap()
    }

    #[test]
    fn names_are_write_once() {
        let mut context = ExecutionContext::new();
        context.bind(name("args"), Value::new(1_u8)).unwrap();

        let err = context.bind(name("args"), Value::new(2_u8)).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert_eq!(context.get_as::<u8>("args"), Some(&1));
    }

    #[test]
    fn typed_lookup() {
        let context = Inputs::new()
            .with("config", "key = value".to_string())
            .unwrap()
            .into_context();

        assert_eq!(
            context.get_as::<String>("config").map(String::as_str),
            Some("key = value")
        );
        assert!(context.get_as::<u32>("config").is_none());
        assert!(context.get_as::<String>("missing").is_none());
        assert!(context.contains("config"));
    }

    #[test]
    fn inputs_reject_invalid_names() {
        assert!(matches!(
            Inputs::new().with("bad name", 1),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn later_input_replaces_earlier() {
        let inputs = Inputs::new().with("x", 1).unwrap().with("x", 2).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs.into_context().get_as::<i32>("x"), Some(&2));
    }

    #[test]
    fn projection_preserves_order() {
        let mut context = ExecutionContext::new();
        for raw in ["a", "b", "c", "d"] {
            context.bind(name(raw), Value::new(())).unwrap();
        }
        let projected = context.project(|n| n.as_str() != "b");
        let names: Vec<&str> = projected.names().map(Name::as_str).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
    }

    #[test]
    fn debug_lists_names_and_types() {
        let context = Inputs::new().with("port", 80_u16).unwrap().into_context();
        assert_eq!(format!("{context:?}"), "{\"port\": Value<u16>}");
    }
}
