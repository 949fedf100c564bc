//! Progress notifications marshaled onto a captured dispatcher.

use crate::context::Dispatcher;

use std::fmt;
use std::sync::Arc;

/// Delivers progress reports to `handler` on the dispatcher captured at
/// construction, whichever thread reports them.
pub struct Progress<P> {
  dispatcher: Arc<dyn Dispatcher>,
  handler: Arc<dyn Fn(P) + Send + Sync + 'static>,
}

impl<P> Clone for Progress<P> {
  fn clone(&self) -> Self {
    Self {
      dispatcher: Arc::clone(&self.dispatcher),
      handler: Arc::clone(&self.handler),
    }
  }
}

impl<P> fmt::Debug for Progress<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Progress").finish_non_exhaustive()
  }
}

impl<P: Send + 'static> Progress<P> {
  pub fn new<F>(dispatcher: Arc<dyn Dispatcher>, handler: F) -> Self
  where
    F: Fn(P) + Send + Sync + 'static,
  {
    Self {
      dispatcher,
      handler: Arc::new(handler),
    }
  }

  /// Like [`Progress::new`], but `handler` also receives `token` with every
  /// report, so one handler can serve several operations.
  pub fn with_token<S, F>(dispatcher: Arc<dyn Dispatcher>, token: S, handler: F) -> Self
  where
    S: Send + Sync + 'static,
    F: Fn(&S, P) + Send + Sync + 'static,
  {
    Self::new(dispatcher, move |progress: P| handler(&token, progress))
  }

  /// Delivers `progress` and blocks until the handler has run.
  pub fn invoke_sync(&self, progress: P) {
    let handler = Arc::clone(&self.handler);
    self.dispatcher.send(Box::new(move || handler(progress)));
  }

  /// Queues `progress` for delivery and returns immediately.
  pub fn invoke_async(&self, progress: P) {
    let handler = Arc::clone(&self.handler);
    self.dispatcher.post(Box::new(move || handler(progress)));
  }
}
