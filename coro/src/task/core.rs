// coro/src/task/core.rs

use crate::error::{Fault, TaskError};

use std::fmt;
use std::mem;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::TaskStatus;

/// A one-shot continuation registered on a task.
pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Someone waiting for the task to settle.
pub(crate) enum Waiter {
  Sync(Thread),
  Async(Waker),
  Callback(Callback),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
      Waiter::Callback(callback) => callback(),
    }
  }
}

/// The settled-or-not state of a task.
pub(crate) enum State<T> {
  Pending,
  Completed(T),
  Faulted(Fault),
  Canceled,
}

impl<T> State<T> {
  fn status(&self) -> TaskStatus {
    match self {
      State::Pending => TaskStatus::Pending,
      State::Completed(_) => TaskStatus::Completed,
      State::Faulted(_) => TaskStatus::Faulted,
      State::Canceled => TaskStatus::Canceled,
    }
  }

  fn error(&self) -> Option<TaskError> {
    match self {
      State::Faulted(fault) => Some(TaskError::Faulted(fault.clone())),
      State::Canceled => Some(TaskError::Canceled),
      State::Pending | State::Completed(_) => None,
    }
  }
}

impl<T: Clone> State<T> {
  fn outcome(&self) -> Option<Result<T, TaskError>> {
    match self {
      State::Pending => None,
      State::Completed(value) => Some(Ok(value.clone())),
      State::Faulted(fault) => Some(Err(TaskError::Faulted(fault.clone()))),
      State::Canceled => Some(Err(TaskError::Canceled)),
    }
  }
}

pub(crate) struct Inner<T> {
  pub(crate) state: State<T>,
  pub(crate) waiters: Vec<Waiter>,
}

/// The shared, mutex-protected core of a task, referenced by the
/// `TaskSource` that settles it and every `Task` handle observing it.
pub(crate) struct TaskShared<T> {
  inner: Mutex<Inner<T>>,
}

impl<T> fmt::Debug for TaskShared<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("TaskShared")
      .field("status", &inner.state.status())
      .field("waiters", &inner.waiters.len())
      .finish()
  }
}

impl<T> TaskShared<T> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Pending,
        waiters: Vec::new(),
      }),
    }
  }

  pub(crate) fn settled(state: State<T>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state,
        waiters: Vec::new(),
      }),
    }
  }

  /// Moves the task out of `Pending`. Returns `false` if it was already settled.
  ///
  /// Waiters are woken after the lock is released, so a callback may freely
  /// inspect this task or register on others.
  pub(crate) fn try_settle(&self, state: State<T>) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if !matches!(inner.state, State::Pending) {
        return false;
      }
      inner.state = state;
      mem::take(&mut inner.waiters)
    };
    for waiter in waiters {
      waiter.wake();
    }
    true
  }

  pub(crate) fn status(&self) -> TaskStatus {
    self.inner.lock().state.status()
  }

  pub(crate) fn error(&self) -> Option<TaskError> {
    self.inner.lock().state.error()
  }

  #[cfg(test)]
  pub(crate) fn waiter_count(&self) -> usize {
    self.inner.lock().waiters.len()
  }

  /// Runs `callback` once the task settles; immediately if it already has.
  pub(crate) fn on_settled(&self, callback: Callback) {
    {
      let mut inner = self.inner.lock();
      if matches!(inner.state, State::Pending) {
        inner.waiters.push(Waiter::Callback(callback));
        return;
      }
    }
    callback();
  }
}

impl<T: Clone> TaskShared<T> {
  pub(crate) fn outcome(&self) -> Option<Result<T, TaskError>> {
    self.inner.lock().state.outcome()
  }

  pub(crate) fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Result<T, TaskError>> {
    let mut inner = self.inner.lock();
    if let Some(outcome) = inner.state.outcome() {
      return Poll::Ready(outcome);
    }
    let already_registered = inner
      .waiters
      .iter()
      .any(|w| matches!(w, Waiter::Async(existing) if existing.will_wake(cx.waker())));
    if !already_registered {
      inner.waiters.push(Waiter::Async(cx.waker().clone()));
    }
    Poll::Pending
  }

  /// Blocks the calling thread until the task settles or `deadline` passes.
  pub(crate) fn wait_until(&self, deadline: Option<Instant>) -> Option<Result<T, TaskError>> {
    let mut registered = false;
    loop {
      {
        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.state.outcome() {
          return Some(outcome);
        }
        if !registered {
          inner.waiters.push(Waiter::Sync(thread::current()));
          registered = true;
        }
      }
      match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return self.abandon_wait();
          }
          thread::park_timeout(deadline - now);
        }
        None => thread::park(),
      }
    }
  }

  /// Unregisters the calling thread after a timed-out wait, unless the task
  /// settled in the meantime.
  fn abandon_wait(&self) -> Option<Result<T, TaskError>> {
    let mut inner = self.inner.lock();
    if let Some(outcome) = inner.state.outcome() {
      return Some(outcome);
    }
    let me = thread::current().id();
    inner
      .waiters
      .retain(|w| !matches!(w, Waiter::Sync(thread) if thread.id() == me));
    None
  }

  pub(crate) fn wait_for(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
    self.wait_until(Some(Instant::now() + timeout))
  }
}
