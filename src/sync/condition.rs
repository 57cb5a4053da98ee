// src/sync/condition.rs

//! A mutex-guarded value paired with a condition variable.
//!
//! [`Condition::wait_for`] re-evaluates its predicate after every wakeup, so
//! spurious wakeups are harmless. Every native wait is bounded by
//! [`MAX_WAIT_SLICE`], even when the caller asked to wait forever, so a
//! waiter never parks in one unbounded native call.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Upper bound for a single native wait.
pub const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct Condition<T> {
    state: Mutex<T>,
    cvar: Condvar,
}

impl<T> Condition<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            cvar: Condvar::new(),
        }
    }

    /// Enter the guarded region.
    ///
    /// A poisoned lock is recovered: every mutation done under this lock is a
    /// single assignment, so the value is never left half-written.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `predicate` holds or `timeout` elapses.
    ///
    /// Returns the guard together with the last value of the predicate, so
    /// `false` means the wait timed out.
    pub fn wait_for<'a, P>(
        &self,
        mut guard: MutexGuard<'a, T>,
        timeout: Option<Duration>,
        mut predicate: P,
    ) -> (MutexGuard<'a, T>, bool)
    where
        P: FnMut(&mut T) -> bool,
    {
        // A timeout past the end of `Instant` is the same as none.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            if predicate(&mut *guard) {
                return (guard, true);
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let ok = predicate(&mut *guard);
                        return (guard, ok);
                    }
                    (deadline - now).min(MAX_WAIT_SLICE)
                }
                None => MAX_WAIT_SLICE,
            };

            guard = match self.cvar.wait_timeout(guard, slice) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn notify_one(&self) {
        self.cvar.notify_one();
    }

    pub fn notify_all(&self) {
        self.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn returns_immediately_when_predicate_holds() {
        let cond = Condition::new(true);
        let guard = cond.lock();
        let start = Instant::now();
        let (_guard, ok) = cond.wait_for(guard, Some(Duration::from_secs(5)), |v| *v);
        assert!(ok);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn unrepresentable_timeout_waits_like_none() {
        let cond = Condition::new(true);
        let guard = cond.lock();
        let (_guard, ok) = cond.wait_for(guard, Some(Duration::MAX), |v| *v);
        assert!(ok);
    }

    #[test]
    fn times_out_with_false() {
        let cond = Condition::new(0u32);
        let guard = cond.lock();
        let start = Instant::now();
        let (_guard, ok) = cond.wait_for(guard, Some(Duration::from_millis(50)), |v| *v > 0);
        assert!(!ok);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wakes_on_notify_without_timeout() {
        let cond = Arc::new(Condition::new(false));
        let setter = {
            let cond = Arc::clone(&cond);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                *cond.lock() = true;
                cond.notify_all();
            })
        };

        let guard = cond.lock();
        let (_guard, ok) = cond.wait_for(guard, None, |v| *v);
        assert!(ok);
        setter.join().unwrap();
    }

    #[test]
    fn observes_change_even_without_notify() {
        // A waiter that is never notified still re-checks after one slice.
        let cond = Arc::new(Condition::new(false));
        {
            let cond = Arc::clone(&cond);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                *cond.lock() = true;
            });
        }

        let guard = cond.lock();
        let (_guard, ok) = cond.wait_for(guard, Some(MAX_WAIT_SLICE * 3), |v| *v);
        assert!(ok);
    }
}
