//! Startup Core
//!
//! This crate resolves and runs program initialization as a graph of
//! steps. Each step declares the names it requires and the names it
//! provides; the crate works out a valid order and calls every step
//! exactly once, threading values from producers to consumers.
//!
//! It implements:
//!
//! - A step registry that refuses duplicate steps and duplicate outputs
//! - Dependency graph construction and validation
//! - Deterministic topological ordering with cycle reporting
//! - Minimal subgraph selection for partial requests
//! - Sequential and parallel execution over a write-once context
//!
//! # Architecture
//!
//! - `registry`: step registration and freezing
//! - `graph`: dependency graph, resolver and execution plans
//! - `executor`: execution context and the two execution strategies
//! - `startup`: the [`Startup`] entry point that ties a pass together
//!
//! # Example
//!
//! ```rust
//! use startup_core::{Inputs, Registry, StepOutputs, StepSpec, Startup};
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     StepSpec::builder("parse_args")
//!         .requires(["argv"])
//!         .provides(["args"])
//!         .build(|inputs| {
//!             let argv = inputs.get::<Vec<String>>("argv")?;
//!             Ok(StepOutputs::new().with("args", argv[1..].to_vec()))
//!         })?,
//! )?;
//! registry.register(
//!     StepSpec::builder("count_args")
//!         .requires(["args"])
//!         .provides(["count"])
//!         .build(|inputs| {
//!             let args = inputs.get::<Vec<String>>("args")?;
//!             Ok(StepOutputs::new().with("count", args.len()))
//!         })?,
//! )?;
//!
//! let startup = Startup::new(registry.freeze());
//! let argv = vec!["prog".to_string(), "-v".to_string()];
//! let context = startup.call(Inputs::new().with("argv", argv)?)?;
//! assert_eq!(context.get_as::<usize>("count"), Some(&1));
//! # Ok::<(), startup_core::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod name;
pub mod pass;
pub mod registry;
pub mod startup;
pub mod step;
pub mod value;

pub use config::{ExecutionMode, StartupConfig};
pub use error::{Error, ExecutionError, Result, StepError};
pub use executor::{ExecutionContext, Executor, Inputs};
pub use graph::{ExecutionPlan, Request};
pub use name::{Name, StepId};
pub use pass::{PassId, PassState};
pub use registry::{FrozenRegistry, Registry};
pub use startup::Startup;
pub use step::{InputError, StepBuilder, StepInputs, StepOutputs, StepSpec};
pub use value::Value;
