// coro/src/context.rs

//! Execution contexts: the "home" a coroutine resumes on.
//!
//! A [`Dispatcher`] accepts jobs and runs them later, in submission order, on
//! its own logical context. A state machine built with a captured dispatcher
//! posts every resumption to it, so all of the body's code runs there even
//! when the awaited tasks settle on arbitrary threads.

use crate::error::panic_message;
use crate::runtime::Job;
use crate::task::{AnyTask, TaskSource};

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use fibre::error::TrySendError;
use fibre::mpsc;
use parking_lot::{Condvar, Mutex};

/// Capacity of a [`ThreadDispatcher`]'s job queue.
const DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// A captured execution context that runs posted jobs in order.
pub trait Dispatcher: Send + Sync + 'static {
  /// Queues `job` to run later on this context. Fire and forget.
  fn post(&self, job: Job);

  /// Returns `true` when called from this context.
  fn is_current(&self) -> bool {
    false
  }

  /// Runs `job` on this context and blocks until it has run.
  ///
  /// Called from the context itself, the job runs inline instead of being
  /// queued behind the caller.
  fn send(&self, job: Job) {
    if self.is_current() {
      job();
      return;
    }
    let source = TaskSource::<()>::new();
    let delivered = source.task();
    self.post(Box::new(move || {
      job();
      source.try_set_result(());
    }));
    // A dropped or panicking job cancels `delivered`, which also ends the wait.
    let _ = delivered.wait();
  }
}

impl fmt::Debug for dyn Dispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Dispatcher")
  }
}

/// A dispatcher backed by a dedicated, named thread.
///
/// Jobs travel through a bounded `fibre` MPSC channel. Posting from another
/// thread blocks while the queue is full. Posting from the home thread never
/// blocks: once the queue is full, its jobs spill into an overflow list that
/// the home thread runs right after the current job. The thread exits once
/// the dispatcher is dropped and the queue drains.
pub struct ThreadDispatcher {
  sender: Mutex<Option<mpsc::BoundedSender<Job>>>,
  overflow: Arc<Mutex<VecDeque<Job>>>,
  thread_id: ThreadId,
  handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ThreadDispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadDispatcher")
      .field("thread_id", &self.thread_id)
      .field("overflow", &self.overflow.lock().len())
      .finish_non_exhaustive()
  }
}

fn run_dispatched(dispatcher: &str, job: Job) {
  if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
    tracing::warn!(
      dispatcher = %dispatcher,
      panic = %panic_message(payload),
      "dispatched job panicked"
    );
  }
}

impl ThreadDispatcher {
  /// Spawns the home thread.
  pub fn spawn(name: &str) -> io::Result<Arc<Self>> {
    let (tx, rx): (mpsc::BoundedSender<Job>, mpsc::BoundedReceiver<Job>) =
      mpsc::bounded(DISPATCH_QUEUE_CAPACITY);
    let overflow: Arc<Mutex<VecDeque<Job>>> = Arc::new(Mutex::new(VecDeque::new()));

    let thread_name = name.to_string();
    let spilled = Arc::clone(&overflow);
    let handle = thread::Builder::new().name(thread_name.clone()).spawn(move || {
      let drain_spilled = || loop {
        let next = spilled.lock().pop_front();
        match next {
          Some(job) => run_dispatched(&thread_name, job),
          None => break,
        }
      };
      // Ends when every sender is gone and the queue is empty.
      while let Ok(job) = rx.recv() {
        run_dispatched(&thread_name, job);
        drain_spilled();
      }
      drain_spilled();
      tracing::debug!(dispatcher = %thread_name, "dispatcher thread exiting");
    })?;

    Ok(Arc::new(Self {
      sender: Mutex::new(Some(tx)),
      overflow,
      thread_id: handle.thread().id(),
      handle: Some(handle),
    }))
  }

  /// The id of the home thread.
  pub fn thread_id(&self) -> ThreadId {
    self.thread_id
  }

  /// Only the home thread drains the queue, so it must never wait for room.
  fn post_from_home(&self, job: Job) {
    let mut overflow = self.overflow.lock();
    if !overflow.is_empty() {
      // Keep the order of jobs this thread already spilled.
      overflow.push_back(job);
      return;
    }
    let sender = self.sender.lock().clone();
    let rejected = match sender {
      Some(sender) => match sender.try_send(job) {
        Ok(()) => false,
        Err(TrySendError::Full(job)) => {
          overflow.push_back(job);
          false
        }
        Err(_) => true,
      },
      None => true,
    };
    if rejected {
      tracing::warn!("dispatcher queue closed; job dropped");
    }
  }
}

impl Dispatcher for ThreadDispatcher {
  fn post(&self, job: Job) {
    if self.is_current() {
      self.post_from_home(job);
      return;
    }
    // Cloned out of the lock so a send blocked on a full queue does not hold
    // up other posters, the home thread included.
    let sender = self.sender.lock().clone();
    let delivered = match sender {
      Some(sender) => sender.send(job).is_ok(),
      None => false,
    };
    if !delivered {
      tracing::warn!("dispatcher queue closed; job dropped");
    }
  }

  fn is_current(&self) -> bool {
    thread::current().id() == self.thread_id
  }
}

impl Drop for ThreadDispatcher {
  fn drop(&mut self) {
    // Disconnect first so the loop can finish.
    drop(self.sender.lock().take());
    if let Some(handle) = self.handle.take() {
      // The last reference may be released by a job on the home thread itself.
      if thread::current().id() != self.thread_id {
        let _ = handle.join();
      }
    }
  }
}

struct Queue {
  jobs: Mutex<VecDeque<Job>>,
  ready: Condvar,
}

impl Queue {
  fn push(&self, job: Job) {
    self.jobs.lock().push_back(job);
    self.ready.notify_one();
  }
}

/// A dispatcher whose queue is drained explicitly by its owning thread, the
/// way a UI message loop pumps its messages.
///
/// The thread that creates it is its home: `is_current` is true there.
pub struct ManualDispatcher {
  queue: Arc<Queue>,
  owner: ThreadId,
}

impl fmt::Debug for ManualDispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManualDispatcher")
      .field("owner", &self.owner)
      .field("queued", &self.len())
      .finish()
  }
}

impl Default for ManualDispatcher {
  fn default() -> Self {
    Self::new()
  }
}

impl ManualDispatcher {
  pub fn new() -> Self {
    Self {
      queue: Arc::new(Queue {
        jobs: Mutex::new(VecDeque::new()),
        ready: Condvar::new(),
      }),
      owner: thread::current().id(),
    }
  }

  /// Number of queued jobs.
  pub fn len(&self) -> usize {
    self.queue.jobs.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Runs every queued job, including jobs queued while draining.
  /// Returns how many ran.
  pub fn run_pending(&self) -> usize {
    let mut ran = 0;
    loop {
      // The lock is released before each job so jobs can post more work.
      let next = self.queue.jobs.lock().pop_front();
      match next {
        Some(job) => {
          job();
          ran += 1;
        }
        None => return ran,
      }
    }
  }

  /// Pumps the queue until `task` settles, blocking while there is nothing to run.
  pub fn run_until(&self, task: &dyn AnyTask) {
    let settled = Arc::new(AtomicBool::new(false));
    {
      let settled = Arc::clone(&settled);
      let queue = Arc::clone(&self.queue);
      task.on_settled(Box::new(move || {
        settled.store(true, Ordering::Release);
        // Take the lock so the notification cannot slip between the pump's
        // check and its wait.
        let _guard = queue.jobs.lock();
        queue.ready.notify_all();
      }));
    }

    loop {
      self.run_pending();
      let mut jobs = self.queue.jobs.lock();
      if settled.load(Ordering::Acquire) {
        return;
      }
      if jobs.is_empty() {
        self.queue.ready.wait(&mut jobs);
      }
    }
  }
}

impl Dispatcher for ManualDispatcher {
  fn post(&self, job: Job) {
    self.queue.push(job);
  }

  fn is_current(&self) -> bool {
    thread::current().id() == self.owner
  }
}
