// src/executor/process_pool/worker.rs

//! The loop a worker process runs: read a request, run the named task,
//! write the tagged outcome back.

use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;
use nix::sys::signal::{SigHandler, Signal, signal};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::executor::process_pool::protocol::{
    RemoteError, RemoteErrorKind, WireOutcome, WorkerRequest, WorkerResponse, read_message,
    write_message,
};
use crate::executor::process_pool::registry::{BadArguments, TaskRegistry};
use crate::future::panic_message;

/// Ignore SIGINT in this process.
///
/// An interrupt is handled once, by the parent, which then tears the pool
/// down. Commands started by tasks get the default disposition back.
pub fn ignore_interrupts() -> anyhow::Result<()> {
    // SAFETY: installing SIG_IGN does not run any handler code.
    let previous = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) };
    previous.context("failed to ignore SIGINT")?;
    Ok(())
}

/// Serve requests from `input` until an `exit` request or EOF.
pub fn run_worker<R, W>(registry: &TaskRegistry, mut input: R, mut output: W) -> anyhow::Result<()>
where
    R: BufRead,
    W: Write,
{
    info!(tasks = ?registry.names().collect::<Vec<_>>(), "worker ready");

    loop {
        let request: Option<WorkerRequest> =
            read_message(&mut input).context("reading request from broker")?;

        let (future_id, task, args) = match request {
            Some(WorkerRequest::Run {
                future_id,
                task,
                args,
            }) => (future_id, task, args),
            Some(WorkerRequest::Exit) => {
                debug!("exit requested");
                break;
            }
            None => {
                debug!("broker closed the request pipe");
                break;
            }
        };

        debug!(future_id, task = %task, "running task");
        let outcome = run_task(registry, &task, args);
        if let WireOutcome::Error(err) = &outcome {
            warn!(future_id, task = %task, error = %err, "task failed");
        }

        write_message(&mut output, &WorkerResponse { future_id, outcome })
            .context("writing response to broker")?;
    }

    Ok(())
}

fn run_task(registry: &TaskRegistry, name: &str, args: Value) -> WireOutcome {
    let Some(task) = registry.get(name) else {
        return WireOutcome::Error(
            RemoteError::new(RemoteErrorKind::UnknownTask, format!("no task named '{name}'"))
                .with_payload(json!({ "task": name })),
        );
    };

    match panic::catch_unwind(AssertUnwindSafe(|| task(args))) {
        Ok(Ok(value)) => WireOutcome::Ok(value),
        Ok(Err(err)) => {
            let kind = if err.downcast_ref::<BadArguments>().is_some() {
                RemoteErrorKind::BadArguments
            } else {
                RemoteErrorKind::Failed
            };
            WireOutcome::Error(RemoteError::new(kind, format!("{err:#}")))
        }
        Err(payload) => WireOutcome::Error(RemoteError::new(
            RemoteErrorKind::Panicked,
            panic_message(payload.as_ref()),
        )),
    }
}
