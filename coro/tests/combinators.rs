mod common;

use common::*;

use fibre_coro::machine::{from_fn, Awaitable, StateMachine};
use fibre_coro::runtime::{Scheduler, ThreadScheduler};
use fibre_coro::tasks;
use fibre_coro::{AnyTask, CoroutineError, Fault, Task, TaskError, TaskSource, TaskStatus};

use std::thread;
use std::time::Duration;

#[test]
fn from_result_is_already_completed() {
  let task = tasks::from_result(5);
  assert_eq!(task.status(), TaskStatus::Completed);
  assert_eq!(task.try_result().unwrap().unwrap(), 5);
}

#[test]
fn run_executes_off_the_calling_thread() {
  let caller = thread::current().id();
  let task = tasks::run(move || thread::current().id() != caller);
  assert!(task.wait_timeout(TEST_TIMEOUT).unwrap().unwrap());
}

#[test]
fn run_action_completes_with_unit() {
  let task = tasks::run_action(|| {});
  assert!(task.wait_timeout(TEST_TIMEOUT).unwrap().is_ok());
}

#[test]
fn run_panic_faults_task() {
  let task: Task<u8> = tasks::run(|| panic!("worker exploded"));
  match task.wait_timeout(TEST_TIMEOUT) {
    Some(Err(TaskError::Faulted(fault))) => match fault.downcast_ref::<CoroutineError>() {
      Some(CoroutineError::Panicked(message)) => assert!(message.contains("worker exploded")),
      other => panic!("Expected Panicked, got {:?}", other),
    },
    other => panic!("Expected a fault, got {:?}", other),
  }
}

#[test]
fn try_run_error_faults_task() {
  let fault = Fault::msg("refused");
  let task: Task<u8> = {
    let fault = fault.clone();
    tasks::try_run(move || Err(fault))
  };
  match task.wait_timeout(TEST_TIMEOUT) {
    Some(Err(TaskError::Faulted(seen))) => assert!(seen.ptr_eq(&fault)),
    other => panic!("Expected a fault, got {:?}", other),
  }
}

#[test]
fn run_on_uses_the_given_scheduler() {
  let scheduler = ThreadScheduler;
  let task = tasks::run_on(&scheduler, || {
    thread::current().name().map(str::to_string)
  });
  let name = task.wait_timeout(TEST_TIMEOUT).unwrap().unwrap();
  assert_eq!(name.as_deref(), Some("fibre-coro-worker"));
  // The scheduler is usable through the trait object as well.
  let _: &dyn Scheduler = &scheduler;
}

#[test]
fn wrap_starts_and_returns_the_task() {
  let task = tasks::wrap(|_machine: &StateMachine<String>| NestBody::new());
  assert_eq!(task.wait_timeout(TEST_TIMEOUT).unwrap().unwrap(), format!("{}{}", TEST1, TEST2));

  let failed = tasks::wrap(|_machine: &StateMachine<bool>| EmptyBody);
  assert!(failed.is_faulted());
}

#[test]
fn when_all_waits_for_every_input() {
  let first = TaskSource::<i32>::new();
  let second = TaskSource::<String>::new();
  let (a, b) = (first.task(), second.task());
  let all = tasks::when_all(&[&a, &b]);

  first.try_set_result(1);
  assert!(!all.is_settled());
  second.try_set_result("two".to_string());
  assert!(all.wait_timeout(TEST_TIMEOUT).unwrap().is_ok());
}

#[test]
fn when_all_completes_despite_faulted_input() {
  let ok = tasks::from_result(1);
  let bad = Task::<i32>::from_fault(Fault::msg("nope"));
  let gone = Task::<()>::canceled();
  let all = tasks::when_all(&[&ok, &bad, &gone]);
  assert_eq!(all.status(), TaskStatus::Completed);
  // The individual outcomes stay on the inputs.
  assert!(bad.is_faulted());
}

#[test]
fn when_all_of_nothing_completes() {
  assert!(tasks::when_all(&[]).is_completed());
}

#[test]
fn when_any_completes_on_first_settle() {
  let fast = TaskSource::<u8>::new();
  let slow = TaskSource::<u8>::new();
  let (f, s) = (fast.task(), slow.task());
  let any = tasks::when_any(&[&s, &f]);

  assert!(!any.is_settled());
  fast.try_set_fault(Fault::msg("fast but broken"));
  assert!(any.is_completed());
  drop(slow);
  assert!(any.is_completed());
}

#[test]
fn when_any_of_nothing_faults() {
  let any = tasks::when_any(&[]);
  match any.wait() {
    Err(TaskError::Faulted(fault)) => {
      assert_eq!(fault.downcast_ref::<CoroutineError>(), Some(&CoroutineError::NoTasks));
    }
    other => panic!("Expected NoTasks fault, got {:?}", other),
  }
}

#[test]
fn machine_can_await_when_all_across_threads() {
  let inputs: Vec<Task<u64>> = (1..=4u64)
    .map(|n| {
      tasks::run(move || {
        thread::sleep(Duration::from_millis(5 * n));
        n * n
      })
    })
    .collect();

  let mut waited = false;
  let machine = StateMachine::new(from_fn(move |m: &StateMachine<u64>| {
    if !waited {
      waited = true;
      let refs: Vec<&dyn AnyTask> = inputs.iter().map(|t| t as &dyn AnyTask).collect();
      return Ok(Some(tasks::when_all(&refs).into()));
    }
    m.checkpoint()?;
    let mut sum = 0;
    for input in &inputs {
      sum += input.try_result().expect("settled by when_all")?;
    }
    m.set_result(sum)?;
    Ok(None)
  }))
  .start();

  assert_eq!(machine.task().wait_timeout(TEST_TIMEOUT).unwrap().unwrap(), 1 + 4 + 9 + 16);
}

#[test]
fn machine_resumes_after_when_any() {
  let never = TaskSource::<()>::new();
  let never_task = never.task();
  let mut waited = false;
  let machine = StateMachine::new(from_fn(move |m: &StateMachine<&'static str>| {
    if !waited {
      waited = true;
      let quick = tasks::run(|| ());
      return Ok(Some(Awaitable::task(&tasks::when_any(&[&never_task, &quick]))));
    }
    m.checkpoint()?;
    m.set_result("first one wins")?;
    Ok(None)
  }))
  .start();

  assert_eq!(machine.task().wait_timeout(TEST_TIMEOUT).unwrap().unwrap(), "first one wins");
  drop(never);
}

#[tokio::test]
async fn run_task_is_awaitable_from_async_code() {
  let value = tokio::time::timeout(TEST_TIMEOUT, tasks::run(|| 6 * 7))
    .await
    .expect("Await timed out")
    .unwrap();
  assert_eq!(value, 42);
}
