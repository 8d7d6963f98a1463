//! Type-erased values threaded between steps.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// A value bound to a name in an execution context.
///
/// Values are shared behind an `Arc`, so handing the same value to several
/// consuming steps never copies it. The concrete type is recovered with
/// [`Value::downcast_ref`].
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            inner: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Borrow the value as `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Name of the concrete type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// True if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcasts_to_the_stored_type_only() {
        let value = Value::new(vec!["prog".to_string(), "cfg.yaml".to_string()]);
        assert!(value.is::<Vec<String>>());
        assert_eq!(value.downcast_ref::<Vec<String>>().unwrap().len(), 2);
        assert!(value.downcast_ref::<String>().is_none());
        assert!(value.type_name().contains("Vec"));
    }

    #[test]
    fn clones_share_the_allocation() {
        let value = Value::new(42_u32);
        let copy = value.clone();
        assert!(value.ptr_eq(&copy));
        assert!(!value.ptr_eq(&Value::new(42_u32)));
    }
}
