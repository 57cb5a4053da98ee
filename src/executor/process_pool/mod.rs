// src/executor/process_pool/mod.rs

//! Executor backed by worker OS processes.
//!
//! Calls are named tasks with JSON arguments ([`TaskCall`]). A dedicated
//! broker thread owns the worker processes and moves calls from the shared
//! queue to idle workers; see the `broker` module for the event flow and
//! [`protocol`] for the wire format.

mod broker;
pub mod protocol;
pub mod registry;
pub mod worker;

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_queue::SegQueue;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::ExecutorError;
use crate::executor::{Executor, join_with_poll};
use crate::future::TaskFuture;

use broker::{Broker, BrokerEvent, WorkerLink};

pub use registry::TaskRegistry;

/// Environment variable carrying a worker's index in the pool.
pub const WORKER_INDEX_ENV: &str = "RUNWARDEN_WORKER_INDEX";

/// How to start one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// The running executable with the `worker` subcommand.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("worker"))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self, index: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0);
        cmd
    }
}

/// A named task plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCall {
    pub task: String,
    pub args: Value,
}

impl TaskCall {
    pub fn new(task: impl Into<String>, args: Value) -> Self {
        Self {
            task: task.into(),
            args,
        }
    }
}

/// A queued call with the future it resolves.
pub(crate) struct PendingCall {
    pub(crate) future_id: u64,
    pub(crate) call: TaskCall,
    pub(crate) future: TaskFuture<Value>,
}

/// State shared between submitters and the broker.
pub(crate) struct Shared {
    /// `None` is the shutdown sentinel.
    pub(crate) queue: SegQueue<Option<PendingCall>>,
    pub(crate) terminating: AtomicBool,
    pub(crate) broken: AtomicBool,
}

struct Control {
    is_shutdown: bool,
    broker: Option<JoinHandle<()>>,
}

pub struct ProcessPoolExecutor {
    max_workers: usize,
    worker_pids: Vec<u32>,
    shared: Arc<Shared>,
    events: Sender<BrokerEvent>,
    next_id: AtomicU64,
    control: Mutex<Control>,
}

impl ProcessPoolExecutor {
    /// Start `max_workers` worker processes and the broker thread.
    pub fn new(max_workers: usize, command: WorkerCommand) -> Result<Self, ExecutorError> {
        if max_workers == 0 {
            return Err(ExecutorError::NoWorkers);
        }

        let (events, inbox) = mpsc::channel();
        let links = spawn_workers(max_workers, &command, &events)?;
        let worker_pids: Vec<u32> = links.iter().map(WorkerLink::pid).collect();

        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
            terminating: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        });

        let broker = Broker::new(Arc::clone(&shared), inbox, links);
        let handle = thread::Builder::new()
            .name("runwarden-broker".to_string())
            .spawn(move || broker.run())?;

        info!(max_workers, pids = ?worker_pids, "process pool started");

        Ok(Self {
            max_workers,
            worker_pids,
            shared,
            events,
            next_id: AtomicU64::new(0),
            control: Mutex::new(Control {
                is_shutdown: false,
                broker: Some(handle),
            }),
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Process ids of the workers started with the pool.
    pub fn worker_pids(&self) -> &[u32] {
        &self.worker_pids
    }

    /// Submit `task` with `args`.
    pub fn submit_task(
        &self,
        task: impl Into<String>,
        args: Value,
    ) -> Result<TaskFuture<Value>, ExecutorError> {
        self.submit(TaskCall::new(task, args))
    }

    /// Stop every worker now.
    ///
    /// Each worker's process group, including any command a task started,
    /// gets SIGTERM and then SIGKILL. Futures of running tasks fail with
    /// `terminated`; queued ones are cancelled. Blocks until the broker has
    /// exited.
    pub fn terminate(&self) {
        let broker = {
            let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
            control.is_shutdown = true;
            self.shared.terminating.store(true, Ordering::SeqCst);
            self.wake();
            control.broker.take()
        };
        if let Some(handle) = broker {
            join_with_poll(handle, "runwarden-broker");
        }
    }

    fn wake(&self) {
        // The broker may already be gone after a drain.
        if self.events.send(BrokerEvent::Wake).is_err() {
            debug!("broker no longer listening");
        }
    }

    fn stop(&self, wait: bool) {
        let broker = {
            let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
            if !control.is_shutdown {
                control.is_shutdown = true;
                self.shared.queue.push(None);
                self.wake();
                debug!("process pool shutdown requested");
            }
            if wait { control.broker.take() } else { None }
        };
        if let Some(handle) = broker {
            join_with_poll(handle, "runwarden-broker");
        }
    }
}

impl Executor for ProcessPoolExecutor {
    type Call = TaskCall;
    type Output = Value;

    fn submit(&self, call: TaskCall) -> Result<TaskFuture<Value>, ExecutorError> {
        let control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.is_shutdown {
            return Err(ExecutorError::Shutdown);
        }
        if self.shared.broken.load(Ordering::SeqCst) {
            return Err(ExecutorError::Broken(
                "all worker processes have exited".to_string(),
            ));
        }

        let future = TaskFuture::new();
        let future_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(future_id, task = %call.task, "task queued");
        self.shared.queue.push(Some(PendingCall {
            future_id,
            call,
            future: future.clone(),
        }));
        self.wake();
        Ok(future)
    }

    fn shutdown(&self, wait: bool) {
        self.stop(wait);
    }
}

impl Drop for ProcessPoolExecutor {
    fn drop(&mut self) {
        self.stop(true);
    }
}

fn spawn_workers(
    count: usize,
    command: &WorkerCommand,
    events: &Sender<BrokerEvent>,
) -> Result<Vec<WorkerLink>, ExecutorError> {
    let mut links: Vec<WorkerLink> = Vec::with_capacity(count);
    for index in 0..count {
        let started = command
            .command(index)
            .spawn()
            .and_then(|child| WorkerLink::start(index, child, events.clone()));
        match started {
            Ok(link) => {
                debug!(worker = index, pid = link.pid(), "worker started");
                links.push(link);
            }
            Err(err) => {
                for link in &mut links {
                    link.kill();
                }
                return Err(ExecutorError::Spawn(err));
            }
        }
    }
    Ok(links)
}
