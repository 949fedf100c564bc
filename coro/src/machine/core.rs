// coro/src/machine/core.rs

use crate::cancel::CancellationToken;
use crate::context::Dispatcher;
use crate::error::{panic_message, CoroutineError, Fault, TaskError};
use crate::runtime::{Job, Scheduler};
use crate::task::{AnyTask, TaskSource, TaskStatus};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Awaitable, Body, MachineState, StateMachine};

// State constants for MachineShared::state
pub(super) const STATE_CREATED: u8 = 0; // Not started yet.
pub(super) const STATE_RUNNING: u8 = 1; // A resumption slice is executing the body.
pub(super) const STATE_SUSPENDED: u8 = 2; // Waiting on a pending task's continuation.
pub(super) const STATE_COMPLETED: u8 = 3; // Terminal.
pub(super) const STATE_FAULTED: u8 = 4; // Terminal.
pub(super) const STATE_CANCELED: u8 = 5; // Terminal.

static NEXT_MACHINE_ID: AtomicU64 = AtomicU64::new(1);

fn is_terminal(raw: u8) -> bool {
  raw >= STATE_COMPLETED
}

fn terminal_state_of(status: TaskStatus) -> Option<u8> {
  match status {
    TaskStatus::Pending => None,
    TaskStatus::Completed => Some(STATE_COMPLETED),
    TaskStatus::Faulted => Some(STATE_FAULTED),
    TaskStatus::Canceled => Some(STATE_CANCELED),
  }
}

thread_local! {
  // Continuations queued while this thread is already running one. `None`
  // when no continuation is running here.
  static CONTINUATIONS: RefCell<Option<VecDeque<Job>>> = RefCell::new(None);
}

/// Runs `job` on this thread, but never nested inside another continuation.
///
/// Settling a task from inside a continuation wakes the next continuation on
/// the same stack; a chain of nested machines would otherwise grow the stack
/// by one resumption per link. Nested calls queue their job instead, and the
/// outermost call drains the queue in a loop.
pub(super) fn run_continuation(job: Job) {
  let job = CONTINUATIONS.with(|cell| match cell.borrow_mut().as_mut() {
    Some(queue) => {
      queue.push_back(job);
      None
    }
    None => Some(job),
  });
  let job = match job {
    Some(job) => job,
    None => return,
  };

  let _drain = DrainGuard::enter();
  job();
  loop {
    let next = CONTINUATIONS.with(|cell| cell.borrow_mut().as_mut().and_then(VecDeque::pop_front));
    match next {
      Some(job) => job(),
      None => break,
    }
  }
}

/// Marks this thread as draining continuations until dropped.
struct DrainGuard;

impl DrainGuard {
  fn enter() -> Self {
    CONTINUATIONS.with(|cell| *cell.borrow_mut() = Some(VecDeque::new()));
    DrainGuard
  }
}

impl Drop for DrainGuard {
  fn drop(&mut self) {
    // Only non-empty if a continuation unwound. The jobs are dropped outside
    // the borrow: dropping one may settle a task and queue more work.
    let leftover = CONTINUATIONS.with(|cell| cell.borrow_mut().take());
    if let Some(leftover) = leftover {
      if !leftover.is_empty() {
        tracing::warn!(dropped = leftover.len(), "continuation unwound; queued resumptions dropped");
      }
    }
  }
}

pub(super) fn decode_state(raw: u8) -> MachineState {
  match raw {
    STATE_CREATED => MachineState::Created,
    STATE_RUNNING => MachineState::Running,
    STATE_SUSPENDED => MachineState::Suspended,
    STATE_COMPLETED => MachineState::Completed,
    STATE_FAULTED => MachineState::Faulted,
    _ => MachineState::Canceled,
  }
}

/// How one resumption slice ended.
enum Exit {
  /// Waiting on a task that has not settled yet.
  Suspend(Arc<dyn AnyTask>),
  /// The sequence ended, either naturally or through the stop sentinel.
  Finished,
  Canceled,
  Faulted(Fault),
  Disposed,
}

/// State shared by every handle to one coroutine instance and by the
/// continuations registered on the tasks it awaits.
pub(crate) struct MachineShared<T> {
  pub(super) id: u64,
  /// Settled by `set_result` or when the machine concludes, whichever is first.
  pub(super) outcome: TaskSource<T>,
  pub(super) last_awaited: Mutex<Option<Arc<dyn AnyTask>>>,
  /// Only one resumption holds this at a time; `None` once released.
  pub(super) body: Mutex<Option<Box<dyn Body<T>>>>,
  pub(super) state: AtomicU8,
  pub(super) disposed: AtomicBool,
  pub(super) token: CancellationToken,
  pub(super) dispatcher: Option<Arc<dyn Dispatcher>>,
  pub(super) scheduler: Arc<dyn Scheduler>,
}

impl<T> fmt::Debug for MachineShared<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MachineShared")
      .field("id", &self.id)
      .field("state", &decode_state(self.state.load(Ordering::Relaxed)))
      .field("disposed", &self.disposed.load(Ordering::Relaxed))
      .field("has_dispatcher", &self.dispatcher.is_some())
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static> MachineShared<T> {
  pub(super) fn new(
    body: Box<dyn Body<T>>,
    token: CancellationToken,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    scheduler: Arc<dyn Scheduler>,
  ) -> Self {
    Self {
      id: NEXT_MACHINE_ID.fetch_add(1, Ordering::Relaxed),
      outcome: TaskSource::new(),
      last_awaited: Mutex::new(None),
      body: Mutex::new(Some(body)),
      state: AtomicU8::new(STATE_CREATED),
      disposed: AtomicBool::new(false),
      token,
      dispatcher,
      scheduler,
    }
  }

  /// Created -> Running. Only the first caller wins.
  pub(super) fn try_begin(&self) -> bool {
    self
      .state
      .compare_exchange(STATE_CREATED, STATE_RUNNING, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// Enters a resumption slice, through the captured dispatcher if there is one.
  pub(super) fn schedule_resume(self: &Arc<Self>) {
    let this = Arc::clone(self);
    match &self.dispatcher {
      Some(dispatcher) => dispatcher.post(Box::new(move || this.resume())),
      None => run_continuation(Box::new(move || this.resume())),
    }
  }

  pub(super) fn resume_on_worker(self: &Arc<Self>) {
    let this = Arc::clone(self);
    self.scheduler.schedule(Box::new(move || this.resume()));
  }

  /// One resumption slice: pulls awaitables until the body suspends on a
  /// pending task or reaches a terminal outcome.
  pub(super) fn resume(self: &Arc<Self>) {
    // Suspended -> Running. Created/Running are left alone (first slice).
    let _ = self.state.compare_exchange(
      STATE_SUSPENDED,
      STATE_RUNNING,
      Ordering::AcqRel,
      Ordering::Acquire,
    );
    tracing::trace!(machine = self.id, "resuming");

    let exit = {
      let mut guard = self.body.lock();
      match guard.as_mut() {
        Some(body) => self.drive(body.as_mut()),
        None => Exit::Disposed,
      }
    };

    match exit {
      Exit::Suspend(task) => {
        // The body lock is released: a task settling during registration
        // re-enters `resume` without deadlocking.
        let this = Arc::clone(self);
        task.on_settled(Box::new(move || this.schedule_resume()));
        if self.disposed.load(Ordering::Acquire) {
          // Disposed from another thread while this slice held the body.
          self.settle_disposed();
        }
      }
      Exit::Finished => self.finish(),
      Exit::Canceled => self.settle_canceled(),
      Exit::Faulted(fault) => self.settle_faulted(fault),
      Exit::Disposed => self.settle_disposed(),
    }
  }

  fn drive(self: &Arc<Self>, body: &mut dyn Body<T>) -> Exit {
    let machine = StateMachine {
      shared: Arc::clone(self),
    };
    loop {
      if self.disposed.load(Ordering::Acquire) {
        return Exit::Disposed;
      }
      let step = panic::catch_unwind(AssertUnwindSafe(|| body.resume(&machine)));
      match step {
        Err(payload) => {
          let message = panic_message(payload);
          return Exit::Faulted(Fault::new(CoroutineError::Panicked(message)));
        }
        Ok(Err(TaskError::Canceled)) => return Exit::Canceled,
        Ok(Err(TaskError::Faulted(fault))) => return Exit::Faulted(fault),
        Ok(Ok(None)) | Ok(Ok(Some(Awaitable::Stop))) => {
          if self.disposed.load(Ordering::Acquire) {
            return Exit::Disposed;
          }
          return Exit::Finished;
        }
        Ok(Ok(Some(Awaitable::Task(task)))) => {
          *self.last_awaited.lock() = Some(Arc::clone(&task));
          if task.status().is_settled() {
            // Settled already: no scheduling round-trip.
            continue;
          }
          // Running -> Suspended; nothing else can conclude while the body is held.
          let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_SUSPENDED,
            Ordering::AcqRel,
            Ordering::Acquire,
          );
          tracing::trace!(machine = self.id, "suspended on pending task");
          return Exit::Suspend(task);
        }
      }
    }
  }

  /// The sequence ended: a result published by `set_result` stands, otherwise
  /// there is no result to publish.
  fn finish(&self) {
    self.conclude(STATE_FAULTED, |outcome| {
      outcome.try_set_fault(Fault::new(CoroutineError::NoResult))
    });
  }

  fn settle_faulted(&self, fault: Fault) {
    let id = self.id;
    self.conclude(STATE_FAULTED, move |outcome| {
      tracing::debug!(machine = id, error = %fault, "coroutine faulted");
      outcome.try_set_fault(fault)
    });
  }

  fn settle_canceled(&self) {
    self.conclude(STATE_CANCELED, TaskSource::try_set_canceled);
  }

  fn settle_disposed(&self) {
    let id = self.id;
    self.conclude(STATE_CANCELED, move |outcome| {
      tracing::debug!(machine = id, "disposed before completion");
      outcome.try_set_canceled()
    });
  }

  /// Moves the machine to its terminal state, settles the outward task and
  /// releases the body.
  ///
  /// Only the first caller to leave the non-terminal states settles anything.
  /// If `set_result` already completed the outward task, that outcome stands
  /// and the terminal state follows it. The state is stored before the task
  /// settles, so continuations running on settlement already observe it.
  fn conclude<F>(&self, state: u8, settle: F)
  where
    F: FnOnce(&TaskSource<T>) -> bool,
  {
    let published = terminal_state_of(self.outcome.status());
    let target = published.unwrap_or(state);
    if self.try_enter_terminal(target) {
      tracing::debug!(machine = self.id, state = ?decode_state(target), "coroutine finished");
      if published.is_none() && !settle(&self.outcome) {
        // A `set_result` from another handle landed after the status read.
        if let Some(actual) = terminal_state_of(self.outcome.status()) {
          self.state.store(actual, Ordering::Release);
        }
      }
    }
    self.release_body();
  }

  /// Any non-terminal state -> `state`. Returns `false` if already terminal.
  fn try_enter_terminal(&self, state: u8) -> bool {
    let mut current = self.state.load(Ordering::Acquire);
    loop {
      if is_terminal(current) {
        return false;
      }
      match self
        .state
        .compare_exchange_weak(current, state, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => return true,
        Err(actual) => current = actual,
      }
    }
  }

  /// Drops the body (and any resources it owns) and the last-awaited reference.
  pub(super) fn release_body(&self) {
    let body = self.body.lock().take();
    drop(body);
    self.last_awaited.lock().take();
  }

  /// Marks the machine disposed and releases the body unless a resumption
  /// currently holds it; that resumption releases it on its way out.
  pub(super) fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    let body = match self.body.try_lock() {
      Some(mut guard) => guard.take(),
      None => return,
    };
    drop(body);
    self.settle_disposed();
  }
}
