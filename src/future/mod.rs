// src/future/mod.rs

//! Single-assignment result cells shared between a submitter and a worker.
//!
//! A [`TaskFuture`] moves through `Pending -> Running -> Finished` or
//! `Pending -> Cancelled`; nothing else. The outcome is written exactly once,
//! on entry to `Finished`.
//!
//! Done-callbacks are taken out of the cell while the lock is held and run
//! after it is released, so a callback may call back into the same future
//! (or submit new work) without deadlocking.
//!
//! - [`wait`] blocks on a group of futures until one of the
//!   [`ReturnWhen`] conditions holds.

pub mod wait;

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::errors::{FutureError, TaskError};
use crate::sync::Condition;

pub use wait::{ReturnWhen, WaitOutcome, wait};

/// Externally visible lifecycle state of a [`TaskFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Running,
    Finished,
    Cancelled,
}

type DoneCallback<T> = Box<dyn FnOnce(&TaskFuture<T>) + Send + 'static>;

/// Handle for removing a callback that has not fired yet.
pub(crate) type CallbackId = u64;

enum Slot<T> {
    Pending,
    Running,
    Finished(Result<T, TaskError>),
    Cancelled,
}

impl<T> Slot<T> {
    fn state(&self) -> FutureState {
        match self {
            Slot::Pending => FutureState::Pending,
            Slot::Running => FutureState::Running,
            Slot::Finished(_) => FutureState::Finished,
            Slot::Cancelled => FutureState::Cancelled,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self, Slot::Finished(_) | Slot::Cancelled)
    }
}

struct Cell<T> {
    slot: Slot<T>,
    callbacks: Vec<(CallbackId, DoneCallback<T>)>,
    next_callback: CallbackId,
}

/// Handle to the eventual result of a submitted task.
///
/// Cloning is cheap and every clone observes the same cell.
pub struct TaskFuture<T> {
    cell: Arc<Condition<Cell<T>>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Default for TaskFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskFuture<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Condition::new(Cell {
                slot: Slot::Pending,
                callbacks: Vec::new(),
                next_callback: 0,
            })),
        }
    }

    pub fn state(&self) -> FutureState {
        self.cell.lock().slot.state()
    }

    pub fn running(&self) -> bool {
        self.state() == FutureState::Running
    }

    pub fn cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// True once the future is `Finished` or `Cancelled`.
    pub fn done(&self) -> bool {
        self.cell.lock().slot.is_done()
    }

    /// True if two handles point at the same cell.
    pub fn same_as(&self, other: &TaskFuture<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Cancel the future if it has not started running.
    ///
    /// Returns `false` (and changes nothing) once a worker has claimed it.
    pub fn cancel(&self) -> bool {
        let callbacks = {
            let mut cell = self.cell.lock();
            if !matches!(cell.slot, Slot::Pending) {
                return false;
            }
            cell.slot = Slot::Cancelled;
            self.cell.notify_all();
            take_callbacks(&mut cell)
        };
        self.invoke_callbacks(callbacks);
        true
    }

    /// Claim the future for execution.
    ///
    /// Returns `false` if it was cancelled, in which case the caller must not
    /// run the task.
    ///
    /// # Panics
    ///
    /// Panics if the future was already claimed or finished; a future is only
    /// ever handed to one worker.
    pub fn set_running_or_notify_cancel(&self) -> bool {
        let mut cell = self.cell.lock();
        match cell.slot.state() {
            FutureState::Cancelled => false,
            FutureState::Pending => {
                cell.slot = Slot::Running;
                true
            }
            other => panic!("future claimed twice (state {other:?})"),
        }
    }

    pub fn set_result(&self, value: T) -> Result<(), FutureError> {
        self.finish(Ok(value), "set the result of")
    }

    pub fn set_exception(&self, err: TaskError) -> Result<(), FutureError> {
        self.finish(Err(err), "set the exception of")
    }

    fn finish(
        &self,
        outcome: Result<T, TaskError>,
        action: &'static str,
    ) -> Result<(), FutureError> {
        let callbacks = {
            let mut cell = self.cell.lock();
            if !matches!(cell.slot, Slot::Running) {
                return Err(FutureError::InvalidState {
                    state: cell.slot.state(),
                    action,
                });
            }
            cell.slot = Slot::Finished(outcome);
            self.cell.notify_all();
            take_callbacks(&mut cell)
        };
        self.invoke_callbacks(callbacks);
        Ok(())
    }

    /// Block until done and return the exception, if any.
    pub fn exception(&self, timeout: Option<Duration>) -> Result<Option<TaskError>, FutureError> {
        let guard = self.cell.lock();
        let (cell, ok) = self.cell.wait_for(guard, timeout, |cell| cell.slot.is_done());
        if !ok {
            return Err(FutureError::Timeout);
        }
        match &cell.slot {
            Slot::Cancelled => Err(FutureError::Cancelled),
            Slot::Finished(Err(err)) => Ok(Some(err.clone())),
            _ => Ok(None),
        }
    }

    /// Non-blocking check used by completion accounting.
    pub(crate) fn failed(&self) -> bool {
        matches!(self.cell.lock().slot, Slot::Finished(Err(_)))
    }

    /// Register `callback` to run once the future is done.
    ///
    /// If it is already done the callback runs right here, before this call
    /// returns.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&TaskFuture<T>) + Send + 'static,
    {
        self.add_removable_callback(callback);
    }

    /// Like [`add_done_callback`](Self::add_done_callback), but returns an id
    /// for [`remove_done_callback`](Self::remove_done_callback). `None` means
    /// the future was already done and the callback has run.
    pub(crate) fn add_removable_callback<F>(&self, callback: F) -> Option<CallbackId>
    where
        F: FnOnce(&TaskFuture<T>) + Send + 'static,
    {
        {
            let mut cell = self.cell.lock();
            if !cell.slot.is_done() {
                let id = cell.next_callback;
                cell.next_callback += 1;
                cell.callbacks.push((id, Box::new(callback)));
                return Some(id);
            }
        }
        self.invoke_callbacks(vec![Box::new(callback)]);
        None
    }

    /// Drop a callback that has not fired. Returns `false` if it already
    /// ran or was never registered.
    pub(crate) fn remove_done_callback(&self, id: CallbackId) -> bool {
        let mut cell = self.cell.lock();
        let before = cell.callbacks.len();
        cell.callbacks.retain(|(key, _)| *key != id);
        cell.callbacks.len() != before
    }

    fn invoke_callbacks(&self, callbacks: Vec<DoneCallback<T>>) {
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
                error!(
                    error = %panic_message(payload.as_ref()),
                    "done callback panicked"
                );
            }
        }
    }
}

impl<T: Clone> TaskFuture<T> {
    /// Block until done and return the value.
    ///
    /// Fails with [`FutureError::Timeout`] if `timeout` elapses first, with
    /// [`FutureError::Cancelled`] if the task never ran, and with
    /// [`FutureError::Failed`] carrying the task's own error otherwise.
    pub fn result(&self, timeout: Option<Duration>) -> Result<T, FutureError> {
        let guard = self.cell.lock();
        let (cell, ok) = self.cell.wait_for(guard, timeout, |cell| cell.slot.is_done());
        if !ok {
            return Err(FutureError::Timeout);
        }
        match &cell.slot {
            Slot::Cancelled => Err(FutureError::Cancelled),
            Slot::Finished(Ok(value)) => Ok(value.clone()),
            Slot::Finished(Err(err)) => Err(FutureError::Failed(err.clone())),
            Slot::Pending | Slot::Running => Err(FutureError::Timeout),
        }
    }
}

fn take_callbacks<T>(cell: &mut Cell<T>) -> Vec<DoneCallback<T>> {
    mem::take(&mut cell.callbacks)
        .into_iter()
        .map(|(_, callback)| callback)
        .collect()
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn cancel_only_succeeds_while_pending() {
        let fut = TaskFuture::<u32>::new();
        assert!(fut.cancel());
        assert!(fut.cancelled());
        assert!(fut.done());
        // A second cancel is a no-op failure.
        assert!(!fut.cancel());
        assert!(!fut.set_running_or_notify_cancel());
    }

    #[test]
    fn cannot_cancel_once_running() {
        let fut = TaskFuture::<u32>::new();
        assert!(fut.set_running_or_notify_cancel());
        assert!(!fut.cancel());
        assert_eq!(fut.state(), FutureState::Running);

        fut.set_result(7).unwrap();
        assert!(!fut.cancel());
        assert_eq!(fut.state(), FutureState::Finished);
        assert_eq!(fut.result(None).unwrap(), 7);
    }

    #[test]
    fn result_only_set_from_running() {
        let fut = TaskFuture::<u32>::new();
        let err = fut.set_result(1).unwrap_err();
        assert!(matches!(
            err,
            FutureError::InvalidState { state: FutureState::Pending, .. }
        ));

        fut.set_running_or_notify_cancel();
        fut.set_result(1).unwrap();
        assert!(fut.set_exception(anyhow::anyhow!("late").into()).is_err());
        assert_eq!(fut.result(None).unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "claimed twice")]
    fn claiming_twice_panics() {
        let fut = TaskFuture::<u32>::new();
        fut.set_running_or_notify_cancel();
        fut.set_running_or_notify_cancel();
    }

    #[test]
    fn result_times_out_while_pending() {
        let fut = TaskFuture::<u32>::new();
        let start = Instant::now();
        let err = fut.result(Some(Duration::from_millis(30))).unwrap_err();
        assert!(matches!(err, FutureError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn result_of_cancelled_future() {
        let fut = TaskFuture::<u32>::new();
        fut.cancel();
        assert!(matches!(fut.result(None), Err(FutureError::Cancelled)));
        assert!(matches!(fut.exception(None), Err(FutureError::Cancelled)));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn exception_keeps_original_error() {
        let fut = TaskFuture::<u32>::new();
        fut.set_running_or_notify_cancel();
        fut.set_exception(anyhow::Error::new(DiskFull).into()).unwrap();

        let err = fut.exception(None).unwrap().unwrap();
        assert!(err.downcast_ref::<DiskFull>().is_some());
        assert_eq!(err.to_string(), "disk full");

        match fut.result(None) {
            Err(FutureError::Failed(e)) => assert!(e.downcast_ref::<DiskFull>().is_some()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blocked_reader_wakes_on_result() {
        let fut = TaskFuture::<String>::new();
        let reader = {
            let fut = fut.clone();
            thread::spawn(move || fut.result(Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        fut.set_running_or_notify_cancel();
        fut.set_result("done".to_string()).unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), "done");
    }

    #[test]
    fn callback_on_finished_future_runs_synchronously() {
        let fut = TaskFuture::<u32>::new();
        fut.set_running_or_notify_cancel();
        fut.set_result(3).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        fut.add_done_callback(move |f| {
            s.store(f.result(None).unwrap() as usize, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn callbacks_run_in_order_and_may_reenter() {
        let fut = TaskFuture::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            fut.add_done_callback(move |f| {
                // Re-entering the same future must not deadlock.
                assert!(f.done());
                order.lock().unwrap().push(i);
            });
        }
        assert!(order.lock().unwrap().is_empty());

        fut.set_running_or_notify_cancel();
        fut.set_result(0).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_callback_does_not_break_completion() {
        let fut = TaskFuture::<u32>::new();
        let ran = Arc::new(AtomicUsize::new(0));
        fut.add_done_callback(|_| panic!("observer bug"));
        {
            let ran = Arc::clone(&ran);
            fut.add_done_callback(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        fut.set_running_or_notify_cancel();
        fut.set_result(1).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(fut.result(None).unwrap(), 1);
    }

    #[test]
    fn cancel_fires_callbacks() {
        let fut = TaskFuture::<u32>::new();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            fut.add_done_callback(move |f| {
                assert!(f.cancelled());
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(fut.cancel());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
