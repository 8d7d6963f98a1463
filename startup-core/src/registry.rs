//! Step Registry
//!
//! The registry collects step specs in registration order. Registration
//! order is the deterministic tie-break used when several steps become
//! runnable at once, so it is preserved everywhere downstream.
//!
//! A registry is frozen before any graph work happens. Freezing hands out
//! an immutable, cheaply clonable [`FrozenRegistry`]; any later attempt to
//! register fails with [`Error::RegistryFrozen`].

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::name::{Name, StepId};
use crate::step::StepSpec;

/// Mutable collection of steps, open until frozen.
#[derive(Debug, Default)]
pub struct Registry {
    steps: IndexMap<StepId, Arc<StepSpec>>,
    /// Which step provides each name.
    producers: HashMap<Name, StepId>,
    frozen: Option<FrozenRegistry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    ///
    /// Fails if the registry is frozen, if the step identity is taken, or
    /// if any of its outputs is already provided by another step. A failed
    /// registration leaves the registry unchanged.
    pub fn register(&mut self, spec: StepSpec) -> Result<()> {
        if self.frozen.is_some() {
            return Err(Error::RegistryFrozen {
                step: spec.id().clone(),
            });
        }
        if self.steps.contains_key(spec.id()) {
            return Err(Error::DuplicateStep {
                step: spec.id().clone(),
            });
        }
        for name in spec.provides() {
            if let Some(existing) = self.producers.get(name) {
                return Err(Error::DuplicateOutput {
                    name: name.clone(),
                    step: spec.id().clone(),
                    existing: existing.clone(),
                });
            }
        }

        for name in spec.provides() {
            self.producers.insert(name.clone(), spec.id().clone());
        }
        debug!(
            step = %spec.id(),
            requires = ?spec.requires(),
            provides = ?spec.provides(),
            "registered step"
        );
        self.steps.insert(spec.id().clone(), Arc::new(spec));
        Ok(())
    }

    /// Freeze the registry and return its snapshot.
    ///
    /// Freezing twice returns the same snapshot.
    pub fn freeze(&mut self) -> FrozenRegistry {
        if let Some(frozen) = &self.frozen {
            return frozen.clone();
        }
        let frozen = FrozenRegistry {
            steps: self.steps.values().cloned().collect(),
        };
        debug!(steps = frozen.len(), "froze registry");
        self.frozen = Some(frozen.clone());
        frozen
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn get(&self, id: &str) -> Option<&StepSpec> {
        self.steps.get(id).map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Immutable snapshot of a registry.
///
/// Shared freely between passes (and threads); steps are addressed by
/// their registration index.
#[derive(Debug, Clone)]
pub struct FrozenRegistry {
    steps: Arc<[Arc<StepSpec>]>,
}

impl FrozenRegistry {
    /// Steps in registration order.
    pub fn steps(&self) -> &[Arc<StepSpec>] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Arc<StepSpec>> {
        self.steps.get(index)
    }

    /// Registration index of a step.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|spec| spec.id().as_str() == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Snapshot that skips registration checks, for exercising the graph
    /// builder's own validation.
    #[cfg(test)]
    pub(crate) fn unchecked(steps: Vec<StepSpec>) -> Self {
        Self {
            steps: steps.into_iter().map(Arc::new).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepOutputs;

    fn step(id: &str, requires: &[&str], provides: &[&str]) -> StepSpec {
        StepSpec::builder(id)
            .requires(requires.iter().copied())
            .provides(provides.iter().copied())
            .build(|_| Ok(StepOutputs::new()))
            .unwrap()
    }

    #[test]
    fn keeps_registration_order() {
        let mut registry = Registry::new();
        registry.register(step("c", &[], &["z"])).unwrap();
        registry.register(step("a", &[], &["x"])).unwrap();
        registry.register(step("b", &[], &["y"])).unwrap();

        let frozen = registry.freeze();
        let ids: Vec<&str> = frozen.steps().iter().map(|s| s.id().as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(frozen.position("a"), Some(1));
        assert_eq!(frozen.position("nope"), None);
    }

    #[test]
    fn rejects_duplicate_step_identity() {
        let mut registry = Registry::new();
        registry.register(step("a", &[], &["x"])).unwrap();

        let err = registry.register(step("a", &[], &["y"])).unwrap_err();
        assert!(matches!(err, Error::DuplicateStep { ref step } if step.as_str() == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_duplicate_output() {
        let mut registry = Registry::new();
        registry.register(step("first", &[], &["config"])).unwrap();

        let err = registry
            .register(step("second", &[], &["other", "config"]))
            .unwrap_err();
        match err {
            Error::DuplicateOutput {
                name,
                step,
                existing,
            } => {
                assert_eq!(name.as_str(), "config");
                assert_eq!(step.as_str(), "second");
                assert_eq!(existing.as_str(), "first");
            }
            other => panic!("expected DuplicateOutput, got {other:?}"),
        }

        // Nothing from the rejected step leaked in.
        registry.register(step("third", &[], &["other"])).unwrap();
        assert!(registry.get("second").is_none());
    }

    #[test]
    fn steps_without_outputs_never_collide() {
        let mut registry = Registry::new();
        registry.register(step("log_a", &["x"], &[])).unwrap();
        registry.register(step("log_b", &["x"], &[])).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn frozen_registry_refuses_registration() {
        let mut registry = Registry::new();
        registry.register(step("a", &[], &["x"])).unwrap();
        let first = registry.freeze();
        assert!(registry.is_frozen());

        let err = registry.register(step("b", &[], &["y"])).unwrap_err();
        assert!(matches!(err, Error::RegistryFrozen { ref step } if step.as_str() == "b"));

        let second = registry.freeze();
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first.steps()[0], &second.steps()[0]));
    }
}
