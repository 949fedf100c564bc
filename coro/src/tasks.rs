// coro/src/tasks.rs

//! Small helpers for building and combining tasks.

use crate::error::{panic_message, CoroutineError, Fault};
use crate::machine::{Body, StateMachine};
use crate::runtime::{default_scheduler, Scheduler};
use crate::task::{AnyTask, Task, TaskSource};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Builds a wrapped state machine around `factory`, starts it, and returns its task.
///
/// ```
/// use fibre_coro::tasks;
///
/// let task = tasks::wrap(|_machine| {
///   fibre_coro::machine::from_fn(|m: &fibre_coro::StateMachine<i32>| {
///     m.set_result(1)?;
///     Ok(None)
///   })
/// });
/// assert_eq!(task.wait().unwrap(), 1);
/// ```
pub fn wrap<T, F, B>(factory: F) -> Task<T>
where
  T: Send + 'static,
  F: FnOnce(&StateMachine<T>) -> B + Send + 'static,
  B: Body<T>,
{
  StateMachine::wrapped(factory).start().task()
}

/// An already completed task. No scheduling is involved.
pub fn from_result<T>(value: T) -> Task<T> {
  Task::from_result(value)
}

/// Runs `f` on the default worker scheduler. A panic faults the task.
pub fn run<T, F>(f: F) -> Task<T>
where
  T: Send + 'static,
  F: FnOnce() -> T + Send + 'static,
{
  run_on(default_scheduler().as_ref(), f)
}

/// Runs `action` on the default worker scheduler.
pub fn run_action<F>(action: F) -> Task<()>
where
  F: FnOnce() + Send + 'static,
{
  run(action)
}

/// Runs `f` on `scheduler`. A panic faults the task.
pub fn run_on<T, F>(scheduler: &dyn Scheduler, f: F) -> Task<T>
where
  T: Send + 'static,
  F: FnOnce() -> T + Send + 'static,
{
  try_run_on(scheduler, move || Ok(f()))
}

/// Runs a fallible `f` on the default worker scheduler; `Err` faults the task.
pub fn try_run<T, F>(f: F) -> Task<T>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T, Fault> + Send + 'static,
{
  try_run_on(default_scheduler().as_ref(), f)
}

/// Runs a fallible `f` on `scheduler`; `Err` or a panic faults the task.
pub fn try_run_on<T, F>(scheduler: &dyn Scheduler, f: F) -> Task<T>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T, Fault> + Send + 'static,
{
  let source = TaskSource::new();
  let task = source.task();
  scheduler.schedule(Box::new(move || {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
      Ok(Ok(value)) => source.try_set_result(value),
      Ok(Err(fault)) => source.try_set_fault(fault),
      Err(payload) => {
        let message = panic_message(payload);
        tracing::debug!(panic = %message, "scheduled closure panicked");
        source.try_set_fault(Fault::new(CoroutineError::Panicked(message)))
      }
    };
  }));
  task
}

/// Completes once every task in `tasks` has settled, whatever the outcomes.
///
/// Individual faults are not surfaced; inspect the inputs for them. An empty
/// set completes immediately.
pub fn when_all(tasks: &[&dyn AnyTask]) -> Task<()> {
  if tasks.is_empty() {
    return Task::from_result(());
  }
  let source = Arc::new(TaskSource::new());
  let task = source.task();
  let remaining = Arc::new(AtomicUsize::new(tasks.len()));
  for input in tasks {
    let source = Arc::clone(&source);
    let remaining = Arc::clone(&remaining);
    input.on_settled(Box::new(move || {
      if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        source.try_set_result(());
      }
    }));
  }
  task
}

/// Completes once any task in `tasks` has settled.
///
/// An empty set can never complete and faults with [`CoroutineError::NoTasks`].
pub fn when_any(tasks: &[&dyn AnyTask]) -> Task<()> {
  if tasks.is_empty() {
    return Task::from_fault(Fault::new(CoroutineError::NoTasks));
  }
  let source = Arc::new(TaskSource::new());
  let task = source.task();
  for input in tasks {
    let source = Arc::clone(&source);
    input.on_settled(Box::new(move || {
      source.try_set_result(());
    }));
  }
  task
}
