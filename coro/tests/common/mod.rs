#![allow(dead_code)]

use fibre_coro::machine::{Awaitable, Body, StateMachine};
use fibre_coro::TaskError;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub const TEST1: &str = "I'm back!";
pub const TEST2: &str = "+1s!";

/// Yields the stop sentinel without ever setting a result.
pub struct NoneBody;

impl Body<bool> for NoneBody {
  fn resume(&mut self, _machine: &StateMachine<bool>) -> Result<Option<Awaitable>, TaskError> {
    Ok(Some(Awaitable::Stop))
  }
}

/// Yields nothing at all.
pub struct EmptyBody;

impl Body<bool> for EmptyBody {
  fn resume(&mut self, _machine: &StateMachine<bool>) -> Result<Option<Awaitable>, TaskError> {
    Ok(None)
  }
}

/// Sets [`TEST1`] and ends without suspending.
pub struct SyncBody;

impl Body<String> for SyncBody {
  fn resume(&mut self, machine: &StateMachine<String>) -> Result<Option<Awaitable>, TaskError> {
    machine.set_result(TEST1.to_string())?;
    Ok(None)
  }
}

/// Awaits a [`SyncBody`] child, then appends [`TEST2`] to its result.
pub enum NestBody {
  Start,
  AwaitingChild,
  Done,
}

impl NestBody {
  pub fn new() -> Self {
    NestBody::Start
  }
}

impl Body<String> for NestBody {
  fn resume(&mut self, machine: &StateMachine<String>) -> Result<Option<Awaitable>, TaskError> {
    match self {
      NestBody::Start => {
        let child = StateMachine::new(SyncBody).start();
        *self = NestBody::AwaitingChild;
        Ok(Some(child.task().into()))
      }
      NestBody::AwaitingChild => {
        let child: String = machine.get_last_result()?;
        machine.set_result(child + TEST2)?;
        *self = NestBody::Done;
        Ok(None)
      }
      NestBody::Done => Ok(None),
    }
  }
}

/// Counts drops, standing in for a scoped resource such as an open client.
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
  pub fn guard(&self) -> DropGuard {
    DropGuard(self.0.clone())
  }

  pub fn drops(&self) -> usize {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug)]
pub struct DropGuard(Arc<AtomicUsize>);

impl Drop for DropGuard {
  fn drop(&mut self) {
    self.0.fetch_add(1, Ordering::SeqCst);
  }
}
