// src/executor/mod.rs

//! Executors: accept units of work, hand back a [`TaskFuture`] per
//! submission.
//!
//! - [`thread_pool`] runs boxed closures on a fixed set of worker threads.
//! - [`synchronous`] runs boxed closures inline on the submitting thread.
//! - [`process_pool`] runs named tasks in worker OS processes, coordinated by
//!   a broker thread.
//!
//! Every executor shuts down with `wait = true` when dropped.

pub mod process_pool;
pub mod synchronous;
pub mod thread_pool;

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::error;

use crate::errors::{ExecutorError, TaskError};
use crate::future::{TaskFuture, panic_message};

pub use process_pool::{ProcessPoolExecutor, TaskCall, WorkerCommand};
pub use synchronous::SynchronousExecutor;
pub use thread_pool::ThreadPoolExecutor;

/// A closure-backed unit of work for the in-process executors.
pub type Job<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send + 'static>;

/// Interval at which shutdown re-checks whether a joined thread has exited.
pub(crate) const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait Executor {
    /// What a caller submits.
    type Call;
    /// What the returned future resolves to.
    type Output: Clone + Send + 'static;

    /// Schedule `call` and return its future.
    ///
    /// Fails with [`ExecutorError::Shutdown`] once `shutdown` has been called.
    fn submit(&self, call: Self::Call) -> Result<TaskFuture<Self::Output>, ExecutorError>;

    /// Stop accepting work. With `wait`, block until every worker has exited.
    fn shutdown(&self, wait: bool);
}

/// Claim `future` and run `func` into it.
///
/// Errors and panics raised by `func` end up in the future's exception
/// slot; nothing escapes into the calling worker.
pub(crate) fn execute_into<T, F>(future: &TaskFuture<T>, func: F)
where
    F: FnOnce() -> anyhow::Result<T>,
{
    if !future.set_running_or_notify_cancel() {
        return;
    }

    let recorded = match panic::catch_unwind(AssertUnwindSafe(func)) {
        Ok(Ok(value)) => future.set_result(value),
        Ok(Err(err)) => future.set_exception(TaskError::from(err)),
        Err(payload) => future.set_exception(TaskError::Panicked(panic_message(payload.as_ref()))),
    };

    if let Err(err) = recorded {
        error!(error = %err, "failed to record task outcome");
    }
}

/// Join `handle`, polling so the caller is never parked in one unbounded
/// native join.
pub(crate) fn join_with_poll(handle: JoinHandle<()>, name: &str) {
    while !handle.is_finished() {
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        error!(thread = %name, "thread panicked before exiting");
    }
}
