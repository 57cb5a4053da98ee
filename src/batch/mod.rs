// src/batch/mod.rs

//! Running every job of a batch file on one executor.
//!
//! Jobs are submitted up front; completion is tracked with [`wait`]. With
//! `fail_fast`, the first job that does not pass cancels every job that
//! has not started yet. Setting the abort flag (Ctrl-C) makes running jobs
//! escalate through their handler and cancels the rest; a process pool is
//! terminated outright, job commands included.

pub mod job;
pub mod report;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ConfigFile, JobSpec};
use crate::errors::{FutureError, RunwardenError};
use crate::executor::process_pool::registry::TaskRegistry;
use crate::executor::{
    Executor, Job, ProcessPoolExecutor, SynchronousExecutor, ThreadPoolExecutor, WorkerCommand,
};
use crate::future::{ReturnWhen, TaskFuture, wait};
use crate::supervisor::SupervisorContext;
use crate::types::ExecutorKind;

pub use job::{Echo, JobOutputHandler, TAIL_LINES, run_job};
pub use report::{BatchSummary, JobReport, JobStatus};

/// How often the collector re-checks the abort flag.
const ABORT_POLL: Duration = Duration::from_millis(200);

/// Name of the worker task that runs one job.
pub const JOB_TASK: &str = "job";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub executor: ExecutorKind,
    pub max_workers: usize,
    pub fail_fast: bool,
    pub shutdown_wait: Duration,
    pub echo: Echo,
    /// Command used to start process-pool workers; defaults to this
    /// executable's `worker` subcommand.
    pub worker_command: Option<WorkerCommand>,
}

impl BatchOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            executor: cfg.executor(),
            max_workers: cfg.max_workers(),
            fail_fast: cfg.fail_fast(),
            shutdown_wait: cfg.shutdown_wait(),
            echo: Echo::Inherit,
            worker_command: None,
        }
    }

    fn context(&self) -> SupervisorContext {
        SupervisorContext::default().with_shutdown_wait(self.shutdown_wait)
    }
}

/// Arguments of the `job` worker task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTaskArgs {
    pub spec: JobSpec,
    pub shutdown_wait_ms: u64,
    #[serde(default)]
    pub echo: Echo,
}

/// The builtin worker tasks plus `job`.
pub fn worker_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::builtin();
    registry.register_typed(JOB_TASK, |args: JobTaskArgs| {
        let ctx = SupervisorContext::default()
            .with_shutdown_wait(Duration::from_millis(args.shutdown_wait_ms));
        // Worker stdout carries responses, so output can only be echoed to
        // stderr here.
        let echo = match args.echo {
            Echo::Off => Echo::Off,
            Echo::Inherit | Echo::Stderr => Echo::Stderr,
        };
        // Aborting a pool signals the worker's whole process group, which
        // takes the job's command down with it.
        let report = run_job(&args.spec, &ctx, echo, Arc::new(AtomicBool::new(false)))?;
        Ok(serde_json::to_value(report)?)
    });
    registry
}

/// Run `jobs` and report on each, in the order given.
pub fn run_batch(
    jobs: &[JobSpec],
    opts: &BatchOptions,
    abort: Arc<AtomicBool>,
) -> anyhow::Result<BatchSummary> {
    info!(
        jobs = jobs.len(),
        executor = %opts.executor,
        max_workers = opts.max_workers,
        fail_fast = opts.fail_fast,
        "starting batch"
    );

    match opts.executor {
        ExecutorKind::Thread => {
            let pool = ThreadPoolExecutor::new(opts.max_workers)?;
            run_in_process(&pool, jobs, opts, abort)
        }
        ExecutorKind::Sync => {
            let exec = SynchronousExecutor::new();
            run_in_process(&exec, jobs, opts, abort)
        }
        ExecutorKind::Process => run_in_workers(jobs, opts, abort),
    }
}

fn run_in_process<E>(
    exec: &E,
    jobs: &[JobSpec],
    opts: &BatchOptions,
    abort: Arc<AtomicBool>,
) -> anyhow::Result<BatchSummary>
where
    E: Executor<Call = Job<JobReport>, Output = JobReport>,
{
    let ctx = opts.context();
    let mut futures = Vec::with_capacity(jobs.len());
    for spec in jobs {
        let spec = spec.clone();
        let ctx = ctx.clone();
        let echo = opts.echo;
        let abort = Arc::clone(&abort);
        let future = if abort.load(Ordering::SeqCst) || fail_fast_tripped(opts, &futures, Ok) {
            cancelled_future()
        } else {
            let call: Job<JobReport> = Box::new(move || run_job(&spec, &ctx, echo, abort));
            exec.submit(call)?
        };
        futures.push(future);
    }

    collect(jobs, &futures, opts.fail_fast, &abort, || {}, |report| Ok(report.clone()))
}

fn run_in_workers(
    jobs: &[JobSpec],
    opts: &BatchOptions,
    abort: Arc<AtomicBool>,
) -> anyhow::Result<BatchSummary> {
    let command = match &opts.worker_command {
        Some(cmd) => cmd.clone(),
        None => WorkerCommand::current_exe().context("locating the runwarden executable")?,
    };
    let pool = ProcessPoolExecutor::new(opts.max_workers, command)?;

    let mut futures = Vec::with_capacity(jobs.len());
    for spec in jobs {
        let args = JobTaskArgs {
            spec: spec.clone(),
            shutdown_wait_ms: opts.shutdown_wait.as_millis() as u64,
            echo: opts.echo,
        };
        futures.push(pool.submit_task(JOB_TASK, serde_json::to_value(args)?)?);
    }

    let summary = collect(
        jobs,
        &futures,
        opts.fail_fast,
        &abort,
        || pool.terminate(),
        |value: &Value| Ok(serde_json::from_value(value.clone())?),
    );
    pool.shutdown(true);
    summary
}

/// With fail-fast on, has any job already finished without passing?
fn fail_fast_tripped<T, F>(opts: &BatchOptions, futures: &[TaskFuture<T>], decode: F) -> bool
where
    T: Clone,
    F: Fn(T) -> anyhow::Result<JobReport>,
{
    opts.fail_fast
        && futures
            .iter()
            .filter(|f| f.done())
            .any(|f| !finished_ok(f, &decode))
}

fn finished_ok<T, F>(future: &TaskFuture<T>, decode: F) -> bool
where
    T: Clone,
    F: Fn(T) -> anyhow::Result<JobReport>,
{
    match future.result(Some(Duration::ZERO)) {
        Ok(value) => decode(value).is_ok_and(|r| r.passed()),
        Err(_) => false,
    }
}

fn cancelled_future<T>() -> TaskFuture<T> {
    let future = TaskFuture::new();
    future.cancel();
    future
}

fn collect<T, F>(
    jobs: &[JobSpec],
    futures: &[TaskFuture<T>],
    fail_fast: bool,
    abort: &AtomicBool,
    on_abort: impl FnOnce(),
    decode: F,
) -> anyhow::Result<BatchSummary>
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> anyhow::Result<JobReport>,
{
    let mut pending: Vec<TaskFuture<T>> = futures.to_vec();
    let mut failing = false;
    let mut on_abort = Some(on_abort);

    while !pending.is_empty() {
        let mode = if fail_fast && !failing {
            ReturnWhen::FirstCompleted
        } else {
            ReturnWhen::AllCompleted
        };
        let outcome = wait(&pending, Some(ABORT_POLL), mode);

        if fail_fast
            && !failing
            && outcome.done.iter().any(|f| !finished_ok(f, |v: T| decode(&v)))
        {
            failing = true;
            warn!("a job did not pass; cancelling jobs that have not started");
            for f in &outcome.not_done {
                f.cancel();
            }
        }

        if abort.load(Ordering::SeqCst) {
            if let Some(on_abort) = on_abort.take() {
                warn!(remaining = outcome.not_done.len(), "interrupted; stopping batch");
                for f in &outcome.not_done {
                    f.cancel();
                }
                on_abort();
            }
        }

        pending = outcome.not_done;
    }

    let reports = jobs
        .iter()
        .zip(futures)
        .map(|(spec, future)| match future.result(Some(Duration::ZERO)) {
            Ok(value) => decode(&value).unwrap_or_else(|e| JobReport::errored(&spec.name, e)),
            Err(FutureError::Cancelled) => JobReport::cancelled(&spec.name),
            Err(e) => JobReport::errored(&spec.name, e),
        })
        .collect();

    Ok(BatchSummary { reports })
}

/// Jobs selected by name, or all of them.
pub fn select_jobs(cfg: &ConfigFile, only: &[String]) -> crate::errors::Result<Vec<JobSpec>> {
    if only.is_empty() {
        return Ok(cfg.job_specs().to_vec());
    }
    only.iter()
        .map(|name| {
            cfg.job(name)
                .cloned()
                .ok_or_else(|| RunwardenError::JobNotFound(name.clone()))
        })
        .collect()
}
