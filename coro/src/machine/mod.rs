// coro/src/machine/mod.rs

//! The coroutine engine.
//!
//! A coroutine body is a resumable state object implementing [`Body`]. Each
//! call to [`Body::resume`] runs the body up to its next suspension point and
//! returns what it wants to wait on:
//!
//! - `Some(Awaitable::Task(..))` suspends until that task settles. A task that
//!   has already settled is passed straight through without a scheduling hop.
//! - `Some(Awaitable::Stop)` ends the sequence early.
//! - `None` ends the sequence.
//!
//! [`StateMachine::set_result`] completes the machine's task immediately; the
//! first outcome sticks. If the sequence ends without one, the task faults with
//! [`CoroutineError::NoResult`]. An `Err` returned from `resume` (typically
//! through `?` on [`StateMachine::checkpoint`] or
//! [`StateMachine::get_last_result`]) ends the machine as Faulted, or as
//! Canceled for [`TaskError::Canceled`], unless a result was already set.
//!
//! ```
//! use fibre_coro::machine::{Awaitable, Body, StateMachine};
//! use fibre_coro::error::TaskError;
//!
//! /// Sets "X" and stops.
//! struct Greeter;
//!
//! impl Body<String> for Greeter {
//!   fn resume(&mut self, machine: &StateMachine<String>) -> Result<Option<Awaitable>, TaskError> {
//!     machine.set_result("X".to_string())?;
//!     Ok(None)
//!   }
//! }
//!
//! let task = StateMachine::new(Greeter).start().task();
//! assert_eq!(task.wait().unwrap(), "X");
//! ```

mod core;
pub mod wrapped;

pub use self::wrapped::{from_fn, FnBody, Wrapped};

use self::core::{decode_state, MachineShared};
use crate::builder::StateMachineBuilder;
use crate::cancel::CancellationToken;
use crate::context::Dispatcher;
use crate::error::{CoroutineError, TaskError};
use crate::runtime::Scheduler;
use crate::task::{AnyTask, Task};

use std::any::type_name;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Something a body yields: a task to wait on, or the stop sentinel.
pub enum Awaitable {
  Task(Arc<dyn AnyTask>),
  Stop,
}

impl Awaitable {
  /// Awaits a clone of `task`.
  pub fn task<T: Send + 'static>(task: &Task<T>) -> Self {
    Awaitable::Task(Arc::new(task.clone()))
  }
}

impl<T: Send + 'static> From<Task<T>> for Awaitable {
  fn from(task: Task<T>) -> Self {
    Awaitable::Task(Arc::new(task))
  }
}

impl fmt::Debug for Awaitable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Awaitable::Task(task) => f.debug_tuple("Task").field(&task.status()).finish(),
      Awaitable::Stop => f.write_str("Stop"),
    }
  }
}

/// A coroutine body: a lazily produced, single-pass sequence of awaitables.
///
/// Implementations keep their locals in `self` and usually track their
/// position with a state enum, advancing it on every `resume`.
pub trait Body<T>: Send + 'static {
  /// Runs until the next suspension point. `Ok(None)` ends the sequence.
  fn resume(&mut self, machine: &StateMachine<T>) -> Result<Option<Awaitable>, TaskError>;
}

/// Lifecycle of a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
  Created,
  Running,
  Suspended,
  Completed,
  Faulted,
  Canceled,
}

impl MachineState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      MachineState::Completed | MachineState::Faulted | MachineState::Canceled
    )
  }
}

/// A handle to one coroutine instance.
///
/// The same handle is passed to the body on every resumption, so the body can
/// record its result and inspect what it last awaited. Handles are cheap to
/// clone; they all refer to the same instance.
pub struct StateMachine<T> {
  pub(crate) shared: Arc<MachineShared<T>>,
}

impl<T> Clone for StateMachine<T> {
  fn clone(&self) -> Self {
    StateMachine {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> fmt::Debug for StateMachine<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StateMachine").field("shared", &self.shared).finish()
  }
}

impl<T: Send + 'static> StateMachine<T> {
  /// A machine driving `body` with the default configuration: no captured
  /// dispatcher, no cancellation, the default worker scheduler.
  pub fn new<B: Body<T>>(body: B) -> Self {
    StateMachineBuilder::new().build(body)
  }

  /// A machine whose body is produced by `factory` on first resumption.
  pub fn wrapped<F, B>(factory: F) -> Self
  where
    F: FnOnce(&StateMachine<T>) -> B + Send + 'static,
    B: Body<T>,
  {
    StateMachineBuilder::new().wrap(factory)
  }

  pub(crate) fn from_parts(
    body: Box<dyn Body<T>>,
    token: CancellationToken,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    scheduler: Arc<dyn Scheduler>,
  ) -> Self {
    StateMachine {
      shared: Arc::new(MachineShared::new(body, token, dispatcher, scheduler)),
    }
  }

  /// Starts pulling from the body.
  ///
  /// With a captured dispatcher the first slice is posted to it; otherwise it
  /// runs synchronously on the calling thread. Nothing the body does is
  /// reported here: every outcome lands in [`StateMachine::task`]. Starting
  /// twice has no effect.
  pub fn start(self) -> Self {
    self.launch(false);
    self
  }

  /// Like [`StateMachine::start`], but without a captured dispatcher the first
  /// slice runs on the configured worker scheduler.
  pub fn start_on_worker(self) -> Self {
    self.launch(true);
    self
  }

  fn launch(&self, on_worker: bool) {
    if !self.shared.try_begin() {
      tracing::warn!(machine = self.shared.id, "state machine already started or disposed");
      return;
    }
    tracing::debug!(
      machine = self.shared.id,
      on_worker,
      captured = self.shared.dispatcher.is_some(),
      "starting state machine"
    );
    if self.shared.dispatcher.is_some() {
      self.shared.schedule_resume();
    } else if on_worker {
      self.shared.resume_on_worker();
    } else {
      self.shared.resume();
    }
  }

  /// Completes the outward task with `value` right away.
  ///
  /// The body keeps running until its sequence ends, but the outcome is
  /// fixed: faults or cancellation raised afterwards no longer change it.
  /// Fails with [`CoroutineError::ResultAlreadySet`] once the outward task
  /// has settled, whether by an earlier `set_result` or otherwise.
  pub fn set_result(&self, value: T) -> Result<(), CoroutineError> {
    if self.shared.outcome.try_set_result(value) {
      Ok(())
    } else {
      Err(CoroutineError::ResultAlreadySet)
    }
  }

  /// Consults the cancellation token and the outcome of the last awaited task.
  ///
  /// Returns `Err(TaskError::Canceled)` if cancellation was requested or the
  /// task was canceled, and the task's own fault if it faulted.
  pub fn checkpoint(&self) -> Result<(), TaskError> {
    self.shared.token.check()?;
    let last = self.shared.last_awaited.lock().clone();
    match last.and_then(|task| task.error()) {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// The result of the last awaited task, after a [`checkpoint`](Self::checkpoint).
  pub fn get_last_result<R>(&self) -> Result<R, TaskError>
  where
    R: Clone + Send + 'static,
  {
    self.checkpoint()?;
    let last = self
      .shared
      .last_awaited
      .lock()
      .clone()
      .ok_or(CoroutineError::NothingAwaited)?;
    let task = last
      .as_any()
      .downcast_ref::<Task<R>>()
      .ok_or(CoroutineError::ResultTypeMismatch {
        expected: type_name::<R>(),
      })?;
    task.wait()
  }

  /// The outward task: settles exactly once with this coroutine's outcome.
  pub fn task(&self) -> Task<T> {
    self.shared.outcome.task()
  }

  pub fn state(&self) -> MachineState {
    decode_state(self.shared.state.load(Ordering::Acquire))
  }

  /// Process-unique id, also used as the `machine` field in log events.
  pub fn id(&self) -> u64 {
    self.shared.id
  }

  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.shared.token
  }

  /// Releases the body and everything it owns. Idempotent.
  ///
  /// A machine disposed before reaching a terminal state settles Canceled,
  /// unless `set_result` already completed its task.
  /// Safe to call from inside the body; the release then happens as soon as
  /// the current resumption returns.
  pub fn dispose(&self) {
    self.shared.dispose();
  }

  pub fn is_disposed(&self) -> bool {
    self.shared.disposed.load(Ordering::Acquire)
  }
}
