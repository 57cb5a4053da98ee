// src/executor/thread_pool.rs

//! Fixed-size pool of worker threads sharing one FIFO task queue.
//!
//! A `None` entry in the queue is the exit sentinel: the worker that pops it
//! leaves its loop. `shutdown` pushes exactly one sentinel per worker.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::errors::ExecutorError;
use crate::executor::{Executor, Job, execute_into, join_with_poll};
use crate::future::TaskFuture;
use crate::sync::Condition;

/// A queued task: the closure together with the future it resolves.
trait WorkItem: Send {
    fn run(self: Box<Self>);
}

struct Task<T> {
    job: Job<T>,
    future: TaskFuture<T>,
}

impl<T: Send + 'static> WorkItem for Task<T> {
    fn run(self: Box<Self>) {
        let Task { job, future } = *self;
        execute_into(&future, job);
    }
}

type Queue = Condition<VecDeque<Option<Box<dyn WorkItem>>>>;

struct PoolState {
    is_shutdown: bool,
    workers: Vec<JoinHandle<()>>,
}

pub struct ThreadPoolExecutor<T> {
    max_workers: usize,
    queue: Arc<Queue>,
    state: Mutex<PoolState>,
    _output: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> ThreadPoolExecutor<T> {
    /// Start exactly `max_workers` worker threads.
    pub fn new(max_workers: usize) -> Result<Self, ExecutorError> {
        if max_workers == 0 {
            return Err(ExecutorError::NoWorkers);
        }

        let queue: Arc<Queue> = Arc::new(Condition::new(VecDeque::new()));
        let mut workers = Vec::with_capacity(max_workers);
        for index in 0..max_workers {
            let queue = Arc::clone(&queue);
            let handle = thread::Builder::new()
                .name(format!("runwarden-pool-{index}"))
                .spawn(move || worker_loop(index, queue))?;
            workers.push(handle);
        }

        info!(max_workers, "thread pool started");

        Ok(Self {
            max_workers,
            queue,
            state: Mutex::new(PoolState {
                is_shutdown: false,
                workers,
            }),
            _output: PhantomData,
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Box `func` and submit it.
    pub fn submit_fn<F>(&self, func: F) -> Result<TaskFuture<T>, ExecutorError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Executor::submit(self, Box::new(func))
    }
}

impl<T> ThreadPoolExecutor<T> {
    fn push(&self, item: Option<Box<dyn WorkItem>>) {
        self.queue.lock().push_back(item);
        self.queue.notify_one();
    }

    fn stop(&self, wait: bool) {
        let workers = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.is_shutdown {
                state.is_shutdown = true;
                for _ in 0..self.max_workers {
                    self.push(None);
                }
                debug!(max_workers = self.max_workers, "thread pool shutdown requested");
            }
            if wait {
                std::mem::take(&mut state.workers)
            } else {
                Vec::new()
            }
        };

        for (index, handle) in workers.into_iter().enumerate() {
            join_with_poll(handle, &format!("runwarden-pool-{index}"));
        }
    }
}

impl<T: Clone + Send + 'static> Executor for ThreadPoolExecutor<T> {
    type Call = Job<T>;
    type Output = T;

    fn submit(&self, call: Job<T>) -> Result<TaskFuture<T>, ExecutorError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_shutdown {
            return Err(ExecutorError::Shutdown);
        }

        let future = TaskFuture::new();
        self.push(Some(Box::new(Task {
            job: call,
            future: future.clone(),
        })));
        Ok(future)
    }

    fn shutdown(&self, wait: bool) {
        self.stop(wait);
    }
}

impl<T> Drop for ThreadPoolExecutor<T> {
    fn drop(&mut self) {
        self.stop(true);
    }
}

fn worker_loop(index: usize, queue: Arc<Queue>) {
    debug!(worker = index, "pool worker started");
    loop {
        let item = {
            let guard = queue.lock();
            let (mut guard, _) = queue.wait_for(guard, None, |q| !q.is_empty());
            guard.pop_front()
        };

        match item {
            Some(Some(task)) => task.run(),
            Some(None) => break,
            None => continue,
        }
    }
    debug!(worker = index, "pool worker exiting");
}
