// coro/src/task/mod.rs

//! A single-assignment task: the completion cell every coroutine awaits and
//! every coroutine produces.
//!
//! A [`TaskSource`] settles the task exactly once, to a value, a [`Fault`] or
//! cancellation. Any number of [`Task`] handles observe it: by callback
//! ([`Task::on_settled`]), by blocking ([`Task::wait`]), or by `.await`.
//!
//! ```
//! use fibre_coro::task::{TaskSource, TaskStatus};
//!
//! let source = TaskSource::<u32>::new();
//! let task = source.task();
//! assert_eq!(task.status(), TaskStatus::Pending);
//!
//! assert!(source.try_set_result(7));
//! assert!(!source.try_set_result(8)); // first settle wins
//! assert_eq!(task.wait().unwrap(), 7);
//! ```

mod core;

use self::core::{State, TaskShared};
use crate::error::{Fault, TaskError};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Observable state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
  Pending,
  Completed,
  Faulted,
  Canceled,
}

impl TaskStatus {
  /// Returns `true` for every state except `Pending`.
  #[inline]
  pub fn is_settled(self) -> bool {
    !matches!(self, TaskStatus::Pending)
  }
}

/// The outcome reported by a callback-style operation, ready to settle a task.
#[derive(Debug)]
pub enum Completion<T> {
  Canceled,
  Error(Fault),
  Done(T),
}

/// The producing side of a task.
///
/// Dropping a source whose task is still pending cancels the task, so
/// observers never wait on a value that can no longer arrive.
pub struct TaskSource<T> {
  shared: Arc<TaskShared<T>>,
}

impl<T> fmt::Debug for TaskSource<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskSource").field("shared", &self.shared).finish()
  }
}

impl<T> Default for TaskSource<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> TaskSource<T> {
  /// Creates a source with a pending task.
  pub fn new() -> Self {
    Self {
      shared: Arc::new(TaskShared::new()),
    }
  }

  /// Returns a handle to the task this source settles.
  pub fn task(&self) -> Task<T> {
    Task {
      shared: Arc::clone(&self.shared),
    }
  }

  /// Completes the task with `value`. Returns `false` if it was already settled.
  pub fn try_set_result(&self, value: T) -> bool {
    self.shared.try_settle(State::Completed(value))
  }

  /// Faults the task. Returns `false` if it was already settled.
  pub fn try_set_fault(&self, fault: Fault) -> bool {
    self.shared.try_settle(State::Faulted(fault))
  }

  /// Cancels the task. Returns `false` if it was already settled.
  pub fn try_set_canceled(&self) -> bool {
    self.shared.try_settle(State::Canceled)
  }

  /// Settles the task from a callback-style completion.
  pub fn settle(&self, completion: Completion<T>) -> bool {
    match completion {
      Completion::Canceled => self.try_set_canceled(),
      Completion::Error(fault) => self.try_set_fault(fault),
      Completion::Done(value) => self.try_set_result(value),
    }
  }

  /// Returns `true` once the task has left `Pending`.
  pub fn is_settled(&self) -> bool {
    self.shared.status().is_settled()
  }

  pub(crate) fn status(&self) -> TaskStatus {
    self.shared.status()
  }
}

impl<T> Drop for TaskSource<T> {
  fn drop(&mut self) {
    self.shared.try_settle(State::Canceled);
  }
}

/// An observable handle to a single-assignment result.
pub struct Task<T> {
  shared: Arc<TaskShared<T>>,
}

impl<T> Clone for Task<T> {
  fn clone(&self) -> Self {
    Task {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> fmt::Debug for Task<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task").field("status", &self.status()).finish()
  }
}

impl<T> Task<T> {
  /// An already completed task.
  pub fn from_result(value: T) -> Self {
    Task {
      shared: Arc::new(TaskShared::settled(State::Completed(value))),
    }
  }

  /// An already faulted task.
  pub fn from_fault(fault: Fault) -> Self {
    Task {
      shared: Arc::new(TaskShared::settled(State::Faulted(fault))),
    }
  }

  /// An already canceled task.
  pub fn canceled() -> Self {
    Task {
      shared: Arc::new(TaskShared::settled(State::Canceled)),
    }
  }

  pub fn status(&self) -> TaskStatus {
    self.shared.status()
  }

  pub fn is_settled(&self) -> bool {
    self.status().is_settled()
  }

  pub fn is_completed(&self) -> bool {
    self.status() == TaskStatus::Completed
  }

  pub fn is_faulted(&self) -> bool {
    self.status() == TaskStatus::Faulted
  }

  pub fn is_canceled(&self) -> bool {
    self.status() == TaskStatus::Canceled
  }

  /// The fault this task settled with, if any.
  pub fn fault(&self) -> Option<Fault> {
    match self.shared.error() {
      Some(TaskError::Faulted(fault)) => Some(fault),
      _ => None,
    }
  }

  /// Registers a one-shot callback that runs when the task settles.
  ///
  /// If the task has already settled, the callback runs immediately on the
  /// calling thread; otherwise it runs on the thread that settles the task.
  pub fn on_settled<F>(&self, callback: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.shared.on_settled(Box::new(callback));
  }

  /// Returns `true` if both handles observe the same task.
  pub fn ptr_eq(&self, other: &Task<T>) -> bool {
    Arc::ptr_eq(&self.shared, &other.shared)
  }
}

impl<T: Clone> Task<T> {
  /// The outcome, without blocking. `None` while pending.
  pub fn try_result(&self) -> Option<Result<T, TaskError>> {
    self.shared.outcome()
  }

  /// Blocks the current thread until the task settles.
  pub fn wait(&self) -> Result<T, TaskError> {
    loop {
      if let Some(outcome) = self.shared.wait_until(None) {
        return outcome;
      }
    }
  }

  /// Blocks for at most `timeout`. Returns `None` if the task is still pending.
  pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
    self.shared.wait_for(timeout)
  }
}

impl<T: Clone> Future for Task<T> {
  type Output = Result<T, TaskError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.shared.poll_outcome(cx)
  }
}

/// A type-erased view of a [`Task`], so a coroutine body can await tasks of
/// different result types through the same channel.
pub trait AnyTask: Send + Sync + 'static {
  fn status(&self) -> TaskStatus;

  /// `Some` for a faulted or canceled task.
  fn error(&self) -> Option<TaskError>;

  fn on_settled(&self, callback: Box<dyn FnOnce() + Send + 'static>);

  fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> AnyTask for Task<T> {
  fn status(&self) -> TaskStatus {
    self.shared.status()
  }

  fn error(&self) -> Option<TaskError> {
    self.shared.error()
  }

  fn on_settled(&self, callback: Box<dyn FnOnce() + Send + 'static>) {
    self.shared.on_settled(callback);
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

impl fmt::Debug for dyn AnyTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AnyTask").field("status", &self.status()).finish()
  }
}
