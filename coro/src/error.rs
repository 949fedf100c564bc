// coro/src/error.rs

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A shareable, type-erased error carried by a faulted task.
///
/// Cloning a `Fault` shares the same underlying error, so the fault a body sees
/// through a checkpoint is the very same value that faulted the awaited task.
/// Use [`Fault::ptr_eq`] to compare identities.
#[derive(Clone)]
pub struct Fault(Arc<dyn StdError + Send + Sync + 'static>);

impl Fault {
  /// Wraps any error as a fault.
  pub fn new<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    Fault(Arc::new(err))
  }

  /// Creates a fault carrying only a message.
  pub fn msg(message: impl Into<String>) -> Self {
    Fault::new(Message(message.into()))
  }

  /// Returns the underlying error if it is of type `E`.
  pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
    self.0.downcast_ref::<E>()
  }

  /// Returns `true` if the underlying error is of type `E`.
  pub fn is<E: StdError + 'static>(&self) -> bool {
    self.0.is::<E>()
  }

  /// Returns `true` if both faults share the same underlying error.
  pub fn ptr_eq(&self, other: &Fault) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for Fault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Fault").field(&self.0).finish()
  }
}

impl fmt::Display for Fault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

impl StdError for Fault {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.0.source()
  }
}

impl From<CoroutineError> for Fault {
  fn from(err: CoroutineError) -> Self {
    Fault::new(err)
  }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

/// The error side of a settled task, and of every body resumption.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
  /// The task (or the coroutine observing it) was canceled. Not a fault.
  #[error("task was canceled")]
  Canceled,
  /// The task faulted with the contained error.
  #[error(transparent)]
  Faulted(Fault),
}

impl TaskError {
  /// Returns `true` for [`TaskError::Canceled`].
  pub fn is_canceled(&self) -> bool {
    matches!(self, TaskError::Canceled)
  }

  /// Returns the fault, if this is [`TaskError::Faulted`].
  pub fn fault(&self) -> Option<&Fault> {
    match self {
      TaskError::Faulted(fault) => Some(fault),
      TaskError::Canceled => None,
    }
  }
}

impl From<Fault> for TaskError {
  fn from(fault: Fault) -> Self {
    TaskError::Faulted(fault)
  }
}

impl From<CoroutineError> for TaskError {
  fn from(err: CoroutineError) -> Self {
    TaskError::Faulted(Fault::new(err))
  }
}

/// Errors raised by the coroutine engine and the task combinators themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoroutineError {
  /// The body's sequence ended without a result having been set.
  #[error("invalid operation: no result")]
  NoResult,

  /// `set_result` was called after the outward task had already settled.
  #[error("invalid operation: result already set")]
  ResultAlreadySet,

  /// The last awaited task does not produce the requested type.
  #[error("last awaited task does not produce `{expected}`")]
  ResultTypeMismatch { expected: &'static str },

  /// `get_last_result` was called before any task was awaited.
  #[error("no task has been awaited yet")]
  NothingAwaited,

  /// A combinator that needs at least one task was given none.
  #[error("at least one task is required")]
  NoTasks,

  /// The body or a scheduled closure panicked.
  #[error("panicked: {0}")]
  Panicked(String),
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
