//! Parallel execution on scoped worker threads.
//!
//! Scheduling state lives behind a single mutex: remaining dependency
//! counts per planned step, the ready set, and the first failure. Step
//! outputs go into a concurrent map whose per-key entry enforces the
//! write-once rule, so workers read inputs without touching the scheduler
//! lock.
//!
//! Once a failure is recorded no further step starts. Steps already running
//! finish, but their outputs are dropped.
//!
//! Workers run inside the caller's span, so per-step logs keep the pass
//! they belong to.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::thread;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn, Span};

use crate::error::{Error, ExecutionError, Result, StepError};
use crate::graph::{ExecutionPlan, PlannedStep};
use crate::name::{Name, StepId};
use crate::value::Value;

use super::{check_outputs, gather_inputs, invoke, ExecutionContext, OutputMismatch};

enum Failure {
    Step { step: StepId, source: StepError },
    Mismatch { step: StepId, mismatch: OutputMismatch },
    Fatal(Error),
}

struct Schedule {
    /// Unfinished producers per plan position.
    waiting_on: Vec<usize>,
    /// Runnable plan positions; lowest first.
    ready: BTreeSet<usize>,
    running: usize,
    finished: usize,
    failure: Option<Failure>,
}

struct Shared<'p> {
    plan: &'p ExecutionPlan,
    bindings: DashMap<Name, Value>,
    schedule: Mutex<Schedule>,
    wake: Condvar,
}

pub(super) fn run(
    plan: &ExecutionPlan,
    context: ExecutionContext,
    workers: NonZeroUsize,
    span: &Span,
) -> Result<ExecutionContext> {
    let seeded: Vec<Name> = context.names().cloned().collect();
    if plan.is_empty() {
        return Ok(context);
    }

    let waiting_on: Vec<usize> = plan
        .steps()
        .iter()
        .map(|step| step.dependencies().len())
        .collect();
    let ready = waiting_on
        .iter()
        .enumerate()
        .filter(|(_, &count)| count == 0)
        .map(|(position, _)| position)
        .collect();

    let shared = Shared {
        plan,
        bindings: context.into_iter().collect(),
        schedule: Mutex::new(Schedule {
            waiting_on,
            ready,
            running: 0,
            finished: 0,
            failure: None,
        }),
        wake: Condvar::new(),
    };

    let threads = workers.get().min(plan.len());
    debug!(threads, steps = plan.len(), "starting parallel execution");
    thread::scope(|scope| {
        for worker in 0..threads {
            let shared = &shared;
            let span = span.clone();
            scope.spawn(move || span.in_scope(|| work(worker, shared)));
        }
    });

    let Shared {
        bindings, schedule, ..
    } = shared;
    let failure = schedule.into_inner().failure;
    let context = collect(plan, &seeded, bindings)?;
    match failure {
        None => Ok(context),
        Some(Failure::Step { step, source }) => {
            Err(ExecutionError::new(step, source, context).into())
        }
        Some(Failure::Mismatch { step, mismatch }) => Err(mismatch.into_error(step, context)),
        Some(Failure::Fatal(err)) => Err(err),
    }
}

fn work(worker: usize, shared: &Shared<'_>) {
    let total = shared.plan.len();
    let mut guard = shared.schedule.lock();
    loop {
        if guard.failure.is_some() || guard.finished == total {
            break;
        }

        let Some(position) = guard.ready.pop_first() else {
            if guard.running == 0 {
                guard.failure = Some(Failure::Fatal(Error::Invariant(
                    "no runnable step while steps remain".to_owned(),
                )));
                shared.wake.notify_all();
                break;
            }
            shared.wake.wait(&mut guard);
            continue;
        };

        let step = &shared.plan.steps()[position];
        guard.running += 1;
        let outcome = MutexGuard::unlocked(&mut guard, || {
            debug!(worker, step = %step.id(), "invoking step");
            run_step(step, &shared.bindings)
        });
        guard.running -= 1;

        let schedule = &mut *guard;
        match outcome {
            Ok(outputs) if schedule.failure.is_none() => {
                complete(schedule, step, outputs, &shared.bindings);
            }
            Ok(_) => debug!(step = %step.id(), "discarding outputs of a failed pass"),
            Err(failure) => {
                match &failure {
                    Failure::Step { step, source } => {
                        warn!(step = %step, error = %source, "step failed, halting pass");
                    }
                    Failure::Mismatch { step, mismatch } => {
                        warn!(step = %step, ?mismatch, "step returned undeclared outputs");
                    }
                    Failure::Fatal(_) => {}
                }
                if schedule.failure.is_none() {
                    schedule.failure = Some(failure);
                }
            }
        }
        shared.wake.notify_all();
    }
}

fn run_step(
    step: &PlannedStep,
    bindings: &DashMap<Name, Value>,
) -> std::result::Result<Vec<(Name, Value)>, Failure> {
    let inputs = gather_inputs(step, |name| bindings.get(name).map(|entry| entry.value().clone()))
        .map_err(Failure::Fatal)?;
    let outputs = invoke(step.spec(), &inputs).map_err(|source| Failure::Step {
        step: step.id().clone(),
        source,
    })?;
    check_outputs(step.spec(), outputs).map_err(|mismatch| Failure::Mismatch {
        step: step.id().clone(),
        mismatch,
    })
}

/// Bind a finished step's outputs and release its dependents.
fn complete(
    schedule: &mut Schedule,
    step: &PlannedStep,
    outputs: Vec<(Name, Value)>,
    bindings: &DashMap<Name, Value>,
) {
    for (name, value) in outputs {
        match bindings.entry(name) {
            Entry::Occupied(entry) => {
                schedule.failure = Some(Failure::Fatal(Error::Invariant(format!(
                    "'{}' is already bound in the execution context",
                    entry.key()
                ))));
                return;
            }
            Entry::Vacant(entry) => {
                debug!(step = %step.id(), name = %entry.key(), "bound output");
                entry.insert(value);
            }
        }
    }

    schedule.finished += 1;
    for &dependent in step.dependents() {
        schedule.waiting_on[dependent] -= 1;
        if schedule.waiting_on[dependent] == 0 {
            schedule.ready.insert(dependent);
        }
    }
}

/// Rebuild an ordered context: seeded inputs first, then outputs in plan order.
fn collect(
    plan: &ExecutionPlan,
    seeded: &[Name],
    bindings: DashMap<Name, Value>,
) -> Result<ExecutionContext> {
    let mut context = ExecutionContext::new();
    let outputs = plan
        .steps()
        .iter()
        .flat_map(|step| step.spec().provides().iter());
    for name in seeded.iter().chain(outputs) {
        if let Some((name, value)) = bindings.remove(name) {
            context.bind(name, value)?;
        }
    }
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Inputs;
    use crate::graph::{GraphBuilder, Request, Resolver};
    use crate::registry::Registry;
    use crate::step::{StepOutputs, StepSpec};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread::ThreadId;
    use std::time::Duration;
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Event, Metadata, Subscriber};

    fn plan_for(steps: Vec<StepSpec>, roots: &[&str]) -> ExecutionPlan {
        let mut registry = Registry::new();
        for spec in steps {
            registry.register(spec).unwrap();
        }
        let registry = registry.freeze();
        let graph = GraphBuilder::new(&registry)
            .roots(roots.iter().map(|n| Name::new(n).unwrap()))
            .build()
            .unwrap();
        Resolver::new(&graph).resolve(&Request::All).unwrap()
    }

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn diamond_runs_each_step_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = |id: &str, requires: &[&str], provides: &'static str| {
            let calls = calls.clone();
            StepSpec::builder(id)
                .requires(requires.iter().copied())
                .provides([provides])
                .build(move |inputs| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let sum: i64 = inputs
                        .names()
                        .map(|name| *inputs.get::<i64>(name.as_str()).unwrap_or(&0))
                        .sum();
                    Ok(StepOutputs::new().with(provides, sum + 1))
                })
                .unwrap()
        };

        let plan = plan_for(
            vec![
                counted("top", &["seed"], "top"),
                counted("left", &["top"], "left"),
                counted("right", &["top"], "right"),
                counted("bottom", &["left", "right"], "bottom"),
            ],
            &["seed"],
        );

        let context = Inputs::new().with("seed", 0_i64).unwrap().into_context();
        let context = run(&plan, context, workers(4), &Span::none()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(context.get_as::<i64>("bottom"), Some(&5));
        let names: Vec<&str> = context.names().map(Name::as_str).collect();
        assert_eq!(names, vec!["seed", "top", "left", "right", "bottom"]);
    }

    #[test]
    fn independent_steps_overlap() {
        // Both steps must be inside their callables at the same time to pass
        // the barrier; a sequential run would block forever.
        let barrier = Arc::new(Barrier::new(2));
        let step = |id: &str, out: &'static str| {
            let barrier = barrier.clone();
            StepSpec::builder(id)
                .provides([out])
                .build(move |_| {
                    barrier.wait();
                    Ok(StepOutputs::new().with(out, ()))
                })
                .unwrap()
        };

        let plan = plan_for(vec![step("a", "a"), step("b", "b")], &[]);
        let context = run(&plan, ExecutionContext::new(), workers(2), &Span::none()).unwrap();
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn failure_stops_scheduling() {
        let downstream = Arc::new(AtomicUsize::new(0));
        let counter = downstream.clone();
        let plan = plan_for(
            vec![
                StepSpec::builder("load")
                    .provides(["data"])
                    .build(|_| Err("no data".into()))
                    .unwrap(),
                StepSpec::builder("use")
                    .requires(["data"])
                    .build(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(StepOutputs::new())
                    })
                    .unwrap(),
            ],
            &[],
        );

        let err = run(&plan, ExecutionContext::new(), workers(3), &Span::none()).unwrap_err();
        assert_eq!(err.as_execution().unwrap().step().as_str(), "load");
        assert_eq!(downstream.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_worker_follows_plan_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let step = |id: &'static str, requires: &[&str]| {
            let order = order.clone();
            StepSpec::builder(id)
                .requires(requires.iter().copied())
                .provides([id])
                .build(move |_| {
                    order.lock().push(id);
                    Ok(StepOutputs::new().with(id, ()))
                })
                .unwrap()
        };

        let plan = plan_for(
            vec![step("c", &["a"]), step("a", &[]), step("b", &[])],
            &[],
        );
        run(&plan, ExecutionContext::new(), workers(1), &Span::none()).unwrap();
        assert_eq!(*order.lock(), vec!["a", "c", "b"]);
    }

    #[test]
    fn outputs_finished_after_a_failure_are_dropped() {
        // Both steps start together; `slow` returns well after `bad` has
        // failed the pass.
        let barrier = Arc::new(Barrier::new(2));
        let finished = Arc::new(AtomicUsize::new(0));

        let slow = {
            let barrier = barrier.clone();
            let finished = finished.clone();
            StepSpec::builder("slow")
                .provides(["slow_out"])
                .build(move |_| {
                    barrier.wait();
                    thread::sleep(Duration::from_millis(100));
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(StepOutputs::new().with("slow_out", 1))
                })
                .unwrap()
        };
        let bad = StepSpec::builder("bad")
            .provides(["bad_out"])
            .build(move |_| {
                barrier.wait();
                Err("bad input".into())
            })
            .unwrap();

        let plan = plan_for(vec![slow, bad], &[]);
        let context = Inputs::new().with("seed", 0_u8).unwrap().into_context();
        let err = run(&plan, context, workers(2), &Span::none()).unwrap_err();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        let execution = err.as_execution().expect("execution error");
        assert_eq!(execution.step().as_str(), "bad");
        let names: Vec<&str> = execution
            .partial_context()
            .names()
            .map(Name::as_str)
            .collect();
        assert_eq!(names, vec!["seed"]);
    }

    #[test]
    fn output_mismatch_keeps_partial_context() {
        let plan = plan_for(
            vec![StepSpec::builder("liar")
                .requires(["seed"])
                .provides(["promised"])
                .build(|_| Ok(StepOutputs::new().with("delivered", 1)))
                .unwrap()],
            &["seed"],
        );
        let context = Inputs::new().with("seed", 0_u8).unwrap().into_context();
        let err = run(&plan, context, workers(2), &Span::none()).unwrap_err();

        assert!(matches!(err, Error::OutputMismatch { .. }));
        assert!(err.partial_context().unwrap().contains("seed"));
    }

    /// Records which thread entered which span.
    #[derive(Clone, Default)]
    struct SpanEntries {
        next: Arc<AtomicU64>,
        entered: Arc<parking_lot::Mutex<Vec<(ThreadId, u64)>>>,
    }

    impl Subscriber for SpanEntries {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &Attributes<'_>) -> Id {
            Id::from_u64(self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn record(&self, _: &Id, _: &Record<'_>) {}

        fn record_follows_from(&self, _: &Id, _: &Id) {}

        fn event(&self, _: &Event<'_>) {}

        fn enter(&self, span: &Id) {
            self.entered.lock().push((thread::current().id(), span.into_u64()));
        }

        fn exit(&self, _: &Id) {}
    }

    #[test]
    fn workers_run_inside_the_callers_span() {
        let entries = SpanEntries::default();
        let step_threads = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let barrier = Arc::new(Barrier::new(2));
        let step = |id: &'static str| {
            let step_threads = step_threads.clone();
            let barrier = barrier.clone();
            StepSpec::builder(id)
                .provides([id])
                .build(move |_| {
                    barrier.wait();
                    step_threads.lock().push(thread::current().id());
                    Ok(StepOutputs::new().with(id, ()))
                })
                .unwrap()
        };
        let plan = plan_for(vec![step("a"), step("b")], &[]);

        let pass_span = tracing::subscriber::with_default(entries.clone(), || {
            let span = tracing::info_span!("pass");
            run(&plan, ExecutionContext::new(), workers(2), &span).unwrap();
            span.id().expect("span enabled").into_u64()
        });

        let entered = entries.entered.lock();
        let step_threads = step_threads.lock();
        assert_eq!(step_threads.len(), 2);
        for thread_id in step_threads.iter() {
            assert_ne!(*thread_id, thread::current().id());
            assert!(entered.contains(&(*thread_id, pass_span)));
        }
    }
}
