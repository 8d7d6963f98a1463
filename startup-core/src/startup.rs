//! Startup
//!
//! The entry point. A [`Startup`] owns a frozen registry and runs passes
//! over it: each pass builds the graph for the caller's inputs, resolves
//! an order for the request, and executes it into a fresh context.

use tracing::{info, warn};

use crate::config::StartupConfig;
use crate::error::Result;
use crate::executor::{ExecutionContext, Executor, Inputs};
use crate::graph::{ExecutionPlan, GraphBuilder, Request, Resolver};
use crate::name::Name;
use crate::pass::Pass;
use crate::registry::FrozenRegistry;

/// Runs passes over a frozen registry.
///
/// # Example
///
/// ```
/// use startup_core::{Inputs, Registry, StepOutputs, StepSpec, Startup};
///
/// let mut registry = Registry::new();
/// registry
///     .register(
///         StepSpec::builder("greet")
///             .requires(["who"])
///             .provides(["greeting"])
///             .build(|inputs| {
///                 let who = inputs.get::<String>("who")?;
///                 Ok(StepOutputs::new().with("greeting", format!("hello {who}")))
///             })
///             .unwrap(),
///     )
///     .unwrap();
///
/// let startup = Startup::new(registry.freeze());
/// let context = startup
///     .call(Inputs::new().with("who", "world".to_string()).unwrap())
///     .unwrap();
/// assert_eq!(
///     context.get_as::<String>("greeting").map(String::as_str),
///     Some("hello world")
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Startup {
    registry: FrozenRegistry,
    config: StartupConfig,
    executor: Executor,
}

impl Startup {
    pub fn new(registry: FrozenRegistry) -> Self {
        Self {
            registry,
            config: StartupConfig::default(),
            executor: Executor::default(),
        }
    }

    pub fn with_config(registry: FrozenRegistry, config: StartupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor: Executor::new(config.execution.clone()),
            registry,
            config,
        })
    }

    pub fn registry(&self) -> &FrozenRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StartupConfig {
        &self.config
    }

    /// Resolve without executing.
    ///
    /// `roots` are the names the caller intends to supply. Runs the same
    /// validation as a real pass, so any structural error a call would
    /// report is reported here too.
    pub fn plan<I, S>(&self, roots: I, request: &Request) -> Result<ExecutionPlan>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roots = roots
            .into_iter()
            .map(Name::new)
            .collect::<Result<Vec<_>>>()?;

        let mut pass = Pass::begin();
        let result = self.resolve(&mut pass, roots, request);
        if let Err(err) = &result {
            pass.fail(err);
        }
        result
    }

    /// Run every registered step.
    pub fn call(&self, inputs: Inputs) -> Result<ExecutionContext> {
        self.run(inputs, &Request::All)
    }

    /// Run only the steps needed for `want`.
    ///
    /// The returned context holds the requested names plus the inputs the
    /// selected steps consumed.
    pub fn call_for<I, S>(&self, inputs: Inputs, want: I) -> Result<ExecutionContext>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let request = Request::outputs(want)?;
        self.run(inputs, &request)
    }

    pub fn run(&self, inputs: Inputs, request: &Request) -> Result<ExecutionContext> {
        let mut pass = Pass::begin();
        info!(
            steps = self.registry.len(),
            inputs = inputs.len(),
            requested = request.names().map_or(0, |names| names.len()),
            "starting pass"
        );

        let result = self.drive(&mut pass, inputs, request);
        match &result {
            Ok(context) => info!(state = %pass.state(), bound = context.len(), "pass finished"),
            Err(err) => {
                pass.fail(err);
                warn!(stage = %err.stage(), error = %err, "pass failed");
            }
        }
        result
    }

    fn drive(
        &self,
        pass: &mut Pass,
        inputs: Inputs,
        request: &Request,
    ) -> Result<ExecutionContext> {
        let roots: Vec<Name> = inputs.names().cloned().collect();
        let plan = self.resolve(pass, roots, request)?;
        info!(planned = plan.len(), "executing plan");

        pass.advance()?;
        let context = self.executor.execute(&plan, inputs)?;
        pass.advance()?;
        Ok(context)
    }

    /// Building -> Validated -> Resolved.
    fn resolve(
        &self,
        pass: &mut Pass,
        roots: Vec<Name>,
        request: &Request,
    ) -> Result<ExecutionPlan> {
        let builder = GraphBuilder::new(&self.registry).roots(roots);
        let graph = match request {
            Request::All => builder.build()?,
            // Satisfiability is checked for the selected steps only.
            Request::Outputs(_) => builder.assemble()?,
        };
        pass.advance()?;

        let plan = Resolver::new(&graph).resolve(request)?;
        pass.advance()?;
        Ok(plan)
    }
}
