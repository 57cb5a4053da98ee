// src/executor/synchronous.rs

//! Executor that runs each task inline, inside `submit`.
//!
//! Same contract as the pools, no concurrency. Useful for debugging a batch
//! one job at a time and for deterministic tests.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::ExecutorError;
use crate::executor::{Executor, Job, execute_into};
use crate::future::TaskFuture;

pub struct SynchronousExecutor<T> {
    is_shutdown: AtomicBool,
    _output: PhantomData<fn() -> T>,
}

impl<T> Default for SynchronousExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SynchronousExecutor<T> {
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            _output: PhantomData,
        }
    }
}

impl<T: Clone + Send + 'static> SynchronousExecutor<T> {
    pub fn submit_fn<F>(&self, func: F) -> Result<TaskFuture<T>, ExecutorError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Executor::submit(self, Box::new(func))
    }
}

impl<T: Clone + Send + 'static> Executor for SynchronousExecutor<T> {
    type Call = Job<T>;
    type Output = T;

    fn submit(&self, call: Job<T>) -> Result<TaskFuture<T>, ExecutorError> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(ExecutorError::Shutdown);
        }
        let future = TaskFuture::new();
        execute_into(&future, call);
        Ok(future)
    }

    fn shutdown(&self, _wait: bool) {
        self.is_shutdown.store(true, Ordering::SeqCst);
    }
}
