// src/lib.rs

pub mod audit;
pub mod batch;
pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod future;
pub mod logging;
pub mod supervisor;
pub mod sync;
pub mod types;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::batch::{BatchOptions, Echo, run_batch, select_jobs};
use crate::cli::{BatchArgs, CliArgs, Command, RunArgs};
use crate::config::loader::load_and_validate;
use crate::config::{ConfigFile, JobSpec};
use crate::executor::process_pool::worker::{ignore_interrupts, run_worker};
use crate::supervisor::{
    CommandSpec, PassthroughHandler, ProcessSupervisor, RunOptions, RunOutcome, SupervisorContext,
};

/// Exit status of `runwarden run` when the command timed out.
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit status of `runwarden run` when the command could not be reaped.
pub const EXIT_ABANDONED: i32 = 125;

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    match args.command {
        Command::Run(run) => tokio::task::spawn_blocking(move || run_command(run)).await?,
        Command::Batch(batch) => run_batch_command(batch).await,
        Command::Worker => tokio::task::spawn_blocking(run_worker_command).await?,
    }
}

fn run_command(args: RunArgs) -> Result<i32> {
    let ctx = SupervisorContext::default().with_shutdown_wait(args.shutdown_wait);
    let spec = CommandSpec::new(args.argv);
    let mut supervisor = ProcessSupervisor::spawn(&spec, &ctx)?;

    let outcome = supervisor.run(
        &mut PassthroughHandler,
        RunOptions {
            timeout: args.timeout,
            output_timeout: args.output_timeout,
            stop_on_done: false,
        },
    )?;
    Ok(exit_code(&outcome))
}

/// Map a run outcome onto an exit status the way `timeout(1)` does.
pub fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::TimedOut(_) => EXIT_TIMED_OUT,
        RunOutcome::Abandoned { .. } => EXIT_ABANDONED,
        RunOutcome::Exited(_) => match outcome.returncode() {
            Some(code) if code < 0 => 128 - code,
            Some(code) => code,
            None => 1,
        },
    }
}

async fn run_batch_command(args: BatchArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let jobs = select_jobs(&cfg, &args.only)?;

    if args.dry_run {
        print_dry_run(&cfg, &jobs);
        return Ok(0);
    }

    let mut opts = BatchOptions::from_config(&cfg);
    if let Some(executor) = args.executor {
        opts.executor = executor;
    }
    if let Some(jobs) = args.jobs {
        opts.max_workers = jobs;
    }
    opts.fail_fast |= args.fail_fast;
    if args.quiet {
        opts.echo = Echo::Off;
    }

    // Ctrl-C → stop the batch, escalating running jobs.
    let abort = Arc::new(AtomicBool::new(false));
    {
        let abort = Arc::clone(&abort);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            warn!("Ctrl+C received; stopping batch");
            abort.store(true, Ordering::SeqCst);
        });
    }

    let summary = tokio::task::spawn_blocking(move || run_batch(&jobs, &opts, abort)).await??;
    println!("{summary}");
    info!(passed = summary.all_passed(), "batch complete");

    Ok(if summary.all_passed() { 0 } else { 1 })
}

fn run_worker_command() -> Result<i32> {
    ignore_interrupts()?;
    let registry = batch::worker_registry();
    run_worker(&registry, io::stdin().lock(), io::stdout().lock())?;
    Ok(0)
}

/// Simple dry-run output: print settings and resolved jobs.
fn print_dry_run(cfg: &ConfigFile, jobs: &[JobSpec]) {
    println!("runwarden dry-run");
    println!("  config.executor = {}", cfg.executor());
    println!("  config.max_workers = {}", cfg.max_workers());
    println!("  config.shutdown_wait = {:?}", cfg.shutdown_wait());
    println!("  config.fail_fast = {}", cfg.fail_fast());
    println!();

    println!("jobs ({}):", jobs.len());
    for job in jobs {
        println!("  - {}", job.name);
        println!("      argv: {:?}", job.argv);
        if let Some(ref cwd) = job.cwd {
            println!("      cwd: {}", cwd.display());
        }
        if !job.env.is_empty() {
            println!("      env: {:?}", job.env);
        }
        if let Some(timeout) = job.timeout {
            println!("      timeout: {timeout:?}");
        }
        if let Some(output_timeout) = job.output_timeout {
            println!("      output_timeout: {output_timeout:?}");
        }
        if let Some(ref pattern) = job.done_on_stdout {
            println!("      done_on_stdout: {pattern}");
            if job.stop_on_done {
                println!("      stop_on_done: true");
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
