use crate::cancel::CancellationToken;
use crate::context::Dispatcher;
use crate::machine::{Body, StateMachine, Wrapped};
use crate::runtime::{default_scheduler, Scheduler};

use std::fmt;
use std::sync::Arc;

/// A builder for [`StateMachine`] instances.
///
/// ```
/// use std::sync::Arc;
/// use fibre_coro::cancel::CancellationSource;
/// use fibre_coro::context::ManualDispatcher;
/// use fibre_coro::builder::StateMachineBuilder;
/// use fibre_coro::machine::{from_fn, StateMachine};
///
/// let home = Arc::new(ManualDispatcher::new());
/// let cancel = CancellationSource::new();
///
/// let machine = StateMachineBuilder::new()
///   .capture(home.clone())
///   .cancellation(cancel.token())
///   .build(from_fn(|m: &StateMachine<&'static str>| {
///     m.checkpoint()?;
///     m.set_result("home")?;
///     Ok(None)
///   }))
///   .start();
///
/// // Nothing runs until the home context pumps its queue.
/// assert!(!machine.task().is_settled());
/// home.run_pending();
/// assert_eq!(machine.task().wait().unwrap(), "home");
/// ```
#[derive(Clone, Default)]
pub struct StateMachineBuilder {
  dispatcher: Option<Arc<dyn Dispatcher>>,
  token: CancellationToken,
  scheduler: Option<Arc<dyn Scheduler>>,
}

impl fmt::Debug for StateMachineBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StateMachineBuilder")
      .field("captured", &self.dispatcher.is_some())
      .field("token", &self.token)
      .field("custom_scheduler", &self.scheduler.is_some())
      .finish()
  }
}

impl StateMachineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Captures `dispatcher` as the machine's home: the first slice and every
  /// resumption are posted to it.
  pub fn capture(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
    self.dispatcher = Some(dispatcher);
    self
  }

  /// The token consulted at every checkpoint.
  pub fn cancellation(mut self, token: CancellationToken) -> Self {
    self.token = token;
    self
  }

  /// The worker scheduler used by `start_on_worker`. Defaults to
  /// [`default_scheduler`].
  pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Builds a machine driving `body`. The machine is not started.
  pub fn build<T, B>(self, body: B) -> StateMachine<T>
  where
    T: Send + 'static,
    B: Body<T>,
  {
    let scheduler = self.scheduler.unwrap_or_else(default_scheduler);
    StateMachine::from_parts(Box::new(body), self.token, self.dispatcher, scheduler)
  }

  /// Builds a machine whose body is produced by `factory` on first resumption.
  pub fn wrap<T, F, B>(self, factory: F) -> StateMachine<T>
  where
    T: Send + 'static,
    F: FnOnce(&StateMachine<T>) -> B + Send + 'static,
    B: Body<T>,
  {
    self.build(Wrapped::new(factory))
  }
}
