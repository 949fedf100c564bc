// coro/src/cancel.rs

//! Cooperative cancellation. A [`CancellationSource`] requests cancellation;
//! coroutines observe it through a [`CancellationToken`] at their checkpoints.

use crate::error::TaskError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The owner side: requests cancellation for every token it handed out.
#[derive(Debug, Default)]
pub struct CancellationSource {
  flag: Arc<AtomicBool>,
}

impl CancellationSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn token(&self) -> CancellationToken {
    CancellationToken {
      flag: Some(Arc::clone(&self.flag)),
    }
  }

  /// Requests cancellation. Idempotent.
  pub fn cancel(&self) {
    self.flag.store(true, Ordering::Release);
  }

  pub fn is_cancellation_requested(&self) -> bool {
    self.flag.load(Ordering::Acquire)
  }
}

/// The observer side. The default token can never be canceled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
  flag: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
  /// A token that is never canceled.
  pub fn none() -> Self {
    Self::default()
  }

  pub fn is_cancellation_requested(&self) -> bool {
    self
      .flag
      .as_ref()
      .map_or(false, |flag| flag.load(Ordering::Acquire))
  }

  /// `Err(TaskError::Canceled)` once cancellation has been requested.
  pub fn check(&self) -> Result<(), TaskError> {
    if self.is_cancellation_requested() {
      Err(TaskError::Canceled)
    } else {
      Ok(())
    }
  }
}
