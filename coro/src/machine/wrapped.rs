//! Bodies supplied as functions instead of dedicated types.

use crate::error::TaskError;

use std::fmt;
use std::marker::PhantomData;

use super::{Awaitable, Body, StateMachine};

/// Produces its body from a factory on first resumption, then drives that
/// body unchanged. The factory receives the machine it runs in.
pub struct Wrapped<F, B> {
  state: WrappedState<F, B>,
}

enum WrappedState<F, B> {
  Pending(F),
  Running(B),
  /// Only observable if the factory panicked.
  Poisoned,
}

impl<F, B> Wrapped<F, B> {
  pub fn new(factory: F) -> Self {
    Self {
      state: WrappedState::Pending(factory),
    }
  }
}

impl<F, B> fmt::Debug for Wrapped<F, B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.state {
      WrappedState::Pending(_) => "Pending",
      WrappedState::Running(_) => "Running",
      WrappedState::Poisoned => "Poisoned",
    };
    f.debug_struct("Wrapped").field("state", &state).finish()
  }
}

impl<T, F, B> Body<T> for Wrapped<F, B>
where
  T: Send + 'static,
  F: FnOnce(&StateMachine<T>) -> B + Send + 'static,
  B: Body<T>,
{
  fn resume(&mut self, machine: &StateMachine<T>) -> Result<Option<Awaitable>, TaskError> {
    if let WrappedState::Pending(_) = self.state {
      if let WrappedState::Pending(factory) = std::mem::replace(&mut self.state, WrappedState::Poisoned) {
        self.state = WrappedState::Running(factory(machine));
      }
    }
    match &mut self.state {
      WrappedState::Running(body) => body.resume(machine),
      _ => Ok(None),
    }
  }
}

/// A closure used directly as a body.
pub struct FnBody<F, T> {
  f: F,
  _marker: PhantomData<fn(&StateMachine<T>)>,
}

impl<F, T> fmt::Debug for FnBody<F, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FnBody").finish_non_exhaustive()
  }
}

/// Turns `f` into a [`Body`]. Each call of `f` is one resumption; the closure
/// keeps its position in captured state.
///
/// ```
/// use fibre_coro::machine::{from_fn, StateMachine};
///
/// let machine = StateMachine::new(from_fn(|m: &StateMachine<u32>| {
///   m.set_result(42)?;
///   Ok(None)
/// }));
/// assert_eq!(machine.start().task().wait().unwrap(), 42);
/// ```
pub fn from_fn<T, F>(f: F) -> FnBody<F, T>
where
  F: FnMut(&StateMachine<T>) -> Result<Option<Awaitable>, TaskError> + Send + 'static,
{
  FnBody {
    f,
    _marker: PhantomData,
  }
}

impl<T, F> Body<T> for FnBody<F, T>
where
  T: Send + 'static,
  F: FnMut(&StateMachine<T>) -> Result<Option<Awaitable>, TaskError> + Send + 'static,
{
  fn resume(&mut self, machine: &StateMachine<T>) -> Result<Option<Awaitable>, TaskError> {
    (self.f)(machine)
  }
}
