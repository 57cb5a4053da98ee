// src/future/wait.rs

//! Wait on a group of futures.
//!
//! Every future gets a completion callback that bumps a shared tally. When
//! the tally satisfies the requested [`ReturnWhen`] condition the waiting
//! thread is woken. The final `done`/`not_done` split is taken from each
//! future's own state, not from the tally, so a future reported as done
//! really is done at the time of partitioning. Callbacks that have not
//! fired are removed again before `wait` returns.

use std::sync::Arc;
use std::time::Duration;

use crate::future::TaskFuture;
use crate::sync::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnWhen {
    /// Return as soon as any future finishes or is cancelled.
    FirstCompleted,
    /// Return as soon as any future fails, or when all are done.
    FirstException,
    /// Return when every future is done.
    AllCompleted,
}

#[derive(Debug)]
pub struct WaitOutcome<T> {
    pub done: Vec<TaskFuture<T>>,
    pub not_done: Vec<TaskFuture<T>>,
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    failed: usize,
    satisfied: bool,
}

struct Waiter {
    total: usize,
    mode: ReturnWhen,
    tally: Condition<Tally>,
}

impl Waiter {
    fn record(&self, failed: bool) {
        let mut tally = self.tally.lock();
        tally.completed += 1;
        if failed {
            tally.failed += 1;
        }
        let satisfied = match self.mode {
            ReturnWhen::FirstCompleted => tally.completed >= 1,
            ReturnWhen::FirstException => tally.failed >= 1 || tally.completed >= self.total,
            ReturnWhen::AllCompleted => tally.completed >= self.total,
        };
        if satisfied && !tally.satisfied {
            tally.satisfied = true;
            self.tally.notify_one();
        }
    }
}

/// Block until `return_when` holds for `futures` or `timeout` elapses.
///
/// Never fails on timeout: whatever has completed by then is returned in
/// `done`, the rest in `not_done`. An empty input returns immediately.
pub fn wait<T>(
    futures: &[TaskFuture<T>],
    timeout: Option<Duration>,
    return_when: ReturnWhen,
) -> WaitOutcome<T>
where
    T: Send + 'static,
{
    if !futures.is_empty() {
        let waiter = Arc::new(Waiter {
            total: futures.len(),
            mode: return_when,
            tally: Condition::new(Tally::default()),
        });

        let registered: Vec<_> = futures
            .iter()
            .map(|fut| {
                let waiter = Arc::clone(&waiter);
                fut.add_removable_callback(move |f| waiter.record(f.failed()))
            })
            .collect();

        {
            let guard = waiter.tally.lock();
            let _ = waiter.tally.wait_for(guard, timeout, |tally| tally.satisfied);
        }

        // Futures still running must not keep this waiter alive; callers
        // poll `wait` in a loop.
        for (fut, id) in futures.iter().zip(registered) {
            if let Some(id) = id {
                fut.remove_done_callback(id);
            }
        }
    }

    let (done, not_done) = futures.iter().cloned().partition(|f| f.done());
    WaitOutcome { done, not_done }
}
