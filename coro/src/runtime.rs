//! Worker-thread schedulers: where `start_on_worker` and [`crate::tasks::run`]
//! send their work.

use std::fmt;
use std::sync::Arc;
use std::thread;

use once_cell::sync::Lazy;

/// A unit of work handed to a scheduler or dispatcher.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A trait for running a job on some worker thread.
pub trait Scheduler: Send + Sync + 'static {
  /// Runs `job` on a worker thread at some later point.
  fn schedule(&self, job: Job);
}

impl fmt::Debug for dyn Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Scheduler")
  }
}

/// Spawns a fresh OS thread per job. Always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
  fn schedule(&self, job: Job) {
    if let Err(e) = thread::Builder::new()
      .name("fibre-coro-worker".to_string())
      .spawn(job)
    {
      tracing::error!(error = %e, "failed to spawn worker thread; job dropped");
    }
  }
}

/// Runs jobs on rayon's global thread pool.
#[cfg(feature = "rayon")]
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonScheduler;

#[cfg(feature = "rayon")]
impl Scheduler for RayonScheduler {
  fn schedule(&self, job: Job) {
    rayon::spawn(job);
  }
}

/// Runs jobs on a Tokio runtime's blocking pool.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioScheduler(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioScheduler {
  /// Creates a scheduler that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl Scheduler for TokioScheduler {
  fn schedule(&self, job: Job) {
    // The join handle is not needed; outcomes travel through tasks.
    let _ = self.0.spawn_blocking(job);
  }
}

#[cfg(feature = "rayon")]
fn initial_scheduler() -> Arc<dyn Scheduler> {
  Arc::new(RayonScheduler)
}

#[cfg(not(feature = "rayon"))]
fn initial_scheduler() -> Arc<dyn Scheduler> {
  Arc::new(ThreadScheduler)
}

static DEFAULT_SCHEDULER: Lazy<Arc<dyn Scheduler>> = Lazy::new(initial_scheduler);

/// The scheduler used when none is configured: rayon's global pool when the
/// `rayon` feature is enabled, a thread per job otherwise.
pub fn default_scheduler() -> Arc<dyn Scheduler> {
  Arc::clone(&DEFAULT_SCHEDULER)
}
