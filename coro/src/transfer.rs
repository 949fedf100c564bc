// coro/src/transfer.rs

//! Adapters from callback-style transfer clients to tasks.
//!
//! A [`TransferClient`] starts an upload or download and later reports
//! progress and a final [`Completion`] through callbacks. [`TransferClientExt`]
//! turns each operation into a [`Task`], optionally relaying progress through
//! a [`Progress`] bridge.

use crate::progress::Progress;
use crate::task::{Completion, Task, TaskSource};

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStage {
  Uploading,
  Downloading,
}

/// Caller-supplied state attached to every progress report of one transfer,
/// so a shared handler can tell concurrent transfers apart.
pub type UserState = Arc<dyn Any + Send + Sync>;

/// A progress report for one transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress {
  pub stage: TransferStage,
  /// Bytes moved so far.
  pub transferred: u64,
  /// Total bytes, if the peer announced it.
  pub total: Option<u64>,
  pub user_state: Option<UserState>,
}

impl TransferProgress {
  /// The user state, if there is one and it is an `S`.
  pub fn user_state_as<S: Any>(&self) -> Option<&S> {
    self.user_state.as_deref().and_then(|state| state.downcast_ref::<S>())
  }
}

/// Called with `(transferred, total)` as a transfer advances.
pub type ProgressCallback = Box<dyn FnMut(u64, Option<u64>) + Send + 'static>;

/// Called once with the outcome of a transfer.
pub type CompletionCallback<T> = Box<dyn FnOnce(Completion<T>) + Send + 'static>;

/// A client following the begin/complete callback convention.
pub trait TransferClient {
  /// Starts downloading `url` into memory.
  fn begin_download_data(
    &self,
    url: &str,
    on_progress: ProgressCallback,
    on_complete: CompletionCallback<Vec<u8>>,
  );

  /// Starts downloading `url` into the file at `path`.
  fn begin_download_file(
    &self,
    url: &str,
    path: &Path,
    on_progress: ProgressCallback,
    on_complete: CompletionCallback<()>,
  );

  /// Starts uploading `body` to `url`; completes with the response body.
  fn begin_upload_data(
    &self,
    url: &str,
    body: Vec<u8>,
    on_progress: ProgressCallback,
    on_complete: CompletionCallback<Vec<u8>>,
  );
}

fn relay(
  stage: TransferStage,
  progress: Option<&Progress<TransferProgress>>,
  user_state: Option<UserState>,
) -> ProgressCallback {
  match progress.cloned() {
    Some(progress) => Box::new(move |transferred: u64, total: Option<u64>| {
      progress.invoke_async(TransferProgress {
        stage,
        transferred,
        total,
        user_state: user_state.clone(),
      })
    }),
    None => Box::new(|_: u64, _: Option<u64>| {}),
  }
}

fn completer<T: Send + 'static>() -> (CompletionCallback<T>, Task<T>) {
  let source = TaskSource::new();
  let task = source.task();
  let on_complete: CompletionCallback<T> = Box::new(move |completion: Completion<T>| {
    source.settle(completion);
  });
  (on_complete, task)
}

/// Task-returning versions of every [`TransferClient`] operation.
pub trait TransferClientExt: TransferClient {
  fn download_data(
    &self,
    url: &str,
    progress: Option<&Progress<TransferProgress>>,
    user_state: Option<UserState>,
  ) -> Task<Vec<u8>> {
    let (on_complete, task) = completer();
    let on_progress = relay(TransferStage::Downloading, progress, user_state);
    self.begin_download_data(url, on_progress, on_complete);
    task
  }

  /// Completes with the path the file was written to.
  fn download_file(
    &self,
    url: &str,
    path: &Path,
    progress: Option<&Progress<TransferProgress>>,
    user_state: Option<UserState>,
  ) -> Task<PathBuf> {
    let source = TaskSource::new();
    let task = source.task();
    let target = path.to_path_buf();
    let on_complete: CompletionCallback<()> = Box::new(move |completion: Completion<()>| {
      source.settle(match completion {
        Completion::Done(()) => Completion::Done(target),
        Completion::Error(fault) => Completion::Error(fault),
        Completion::Canceled => Completion::Canceled,
      });
    });
    let on_progress = relay(TransferStage::Downloading, progress, user_state);
    self.begin_download_file(url, path, on_progress, on_complete);
    task
  }

  fn upload_data(
    &self,
    url: &str,
    body: Vec<u8>,
    progress: Option<&Progress<TransferProgress>>,
    user_state: Option<UserState>,
  ) -> Task<Vec<u8>> {
    let (on_complete, task) = completer();
    let on_progress = relay(TransferStage::Uploading, progress, user_state);
    self.begin_upload_data(url, body, on_progress, on_complete);
    task
  }
}

impl<C: TransferClient + ?Sized> TransferClientExt for C {}
