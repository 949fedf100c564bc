#![warn(missing_debug_implementations, rust_2018_idioms)]

//! Manual suspend/resume coroutines over single-assignment tasks.
//!
//! A coroutine body is a resumable state object that yields the tasks it
//! wants to wait on. A [`StateMachine`] drives it: each time the awaited task
//! settles, the machine resumes the body, and when the body's sequence ends
//! the machine settles its own task with the body's result, fault or
//! cancellation.
//!
//! ```
//! use fibre_coro::machine::{from_fn, Awaitable, StateMachine};
//! use fibre_coro::tasks;
//!
//! // A child that produces "X".
//! let child = tasks::from_result("X".to_string());
//!
//! // A parent that awaits the child and appends "Y".
//! let mut awaited = false;
//! let parent = StateMachine::new(from_fn(move |m: &StateMachine<String>| {
//!   if !awaited {
//!     awaited = true;
//!     return Ok(Some(Awaitable::task(&child)));
//!   }
//!   let x: String = m.get_last_result()?;
//!   m.set_result(x + "Y")?;
//!   Ok(None)
//! }))
//! .start();
//!
//! assert_eq!(parent.task().wait().unwrap(), "XY");
//! ```
//!
//! # Modules
//! - [`task`]: the task primitive ([`Task`], [`TaskSource`]).
//! - [`machine`]: the engine, bodies and the function-based adapter.
//! - [`tasks`]: `wrap`, `from_result`, `run`, `when_all`, `when_any`.
//! - [`context`] and [`runtime`]: where resumptions and worker jobs run.
//! - [`cancel`]: cooperative cancellation.
//! - [`progress`] and [`transfer`]: progress bridge and callback adapters.

pub mod builder;
pub mod cancel;
pub mod context;
pub mod error;
pub mod machine;
pub mod progress;
pub mod runtime;
pub mod task;
pub mod tasks;
pub mod transfer;

// Re-export the primary user-facing types for convenience
pub use builder::StateMachineBuilder;
pub use cancel::{CancellationSource, CancellationToken};
pub use context::{Dispatcher, ManualDispatcher, ThreadDispatcher};
pub use error::{CoroutineError, Fault, TaskError};
pub use machine::{Awaitable, Body, MachineState, StateMachine};
pub use runtime::{Job, Scheduler};
pub use task::{AnyTask, Completion, Task, TaskSource, TaskStatus};
