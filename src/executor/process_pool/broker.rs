// src/executor/process_pool/broker.rs

//! The broker thread: the only owner of worker processes and their pipes.
//!
//! Submitters push calls onto the shared queue and send [`BrokerEvent::Wake`].
//! One reader thread per worker turns response lines into
//! [`BrokerEvent::Response`] and reports EOF as [`BrokerEvent::WorkerExited`].
//! The broker moves queued calls to idle workers, resolves futures from
//! responses, and tears everything down on shutdown or terminate.
//!
//! Each worker leads its own process group, which also holds the commands
//! its tasks start. Tearing a worker down signals the whole group. A worker
//! is never waited on from the event loop; exited workers are reaped with
//! `try_wait` as later events arrive and for good in `finish`.

use std::collections::{HashMap, VecDeque};
use std::io::BufReader;
use std::process::{Child, ChildStdin, ChildStdout};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::errors::TaskError;
use crate::executor::join_with_poll;
use crate::executor::process_pool::protocol::{
    RemoteError, RemoteErrorKind, WireOutcome, WorkerRequest, WorkerResponse, read_message,
    write_message,
};
use crate::executor::process_pool::{PendingCall, Shared};
use crate::future::TaskFuture;

/// How long a worker gets to exit, after closing its stdout or after
/// SIGTERM, before its process group is killed.
const REAP_GRACE: Duration = Duration::from_secs(1);
const REAP_POLL: Duration = Duration::from_millis(10);

/// What wakes the broker.
#[derive(Debug)]
pub(crate) enum BrokerEvent {
    /// New work was queued, or shutdown/terminate was requested.
    Wake,
    Response {
        worker: usize,
        response: WorkerResponse,
    },
    /// The worker's stdout reached EOF.
    WorkerExited { worker: usize },
}

pub(crate) struct WorkerLink {
    index: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    in_flight: Option<u64>,
    alive: bool,
    reaped: bool,
}

impl WorkerLink {
    /// Take ownership of a freshly spawned worker and start its reader thread.
    pub(crate) fn start(
        index: usize,
        mut child: Child,
        events: Sender<BrokerEvent>,
    ) -> std::io::Result<Self> {
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout is not piped"))?;
        let reader = thread::Builder::new()
            .name(format!("runwarden-reader-{index}"))
            .spawn(move || read_responses(index, stdout, events))?;

        Ok(Self {
            index,
            child,
            stdin,
            reader: Some(reader),
            in_flight: None,
            alive: true,
            reaped: false,
        })
    }

    pub(crate) fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Kill and reap; used when pool start-up fails half way.
    pub(crate) fn kill(&mut self) {
        self.stdin = None;
        self.signal_group(Signal::SIGKILL);
        self.force_reap();
        if let Some(reader) = self.reader.take() {
            join_with_poll(reader, &format!("runwarden-reader-{}", self.index));
        }
    }

    fn send(&mut self, request: &WorkerRequest) -> std::io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => write_message(stdin, request),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker request pipe already closed",
            )),
        }
    }

    /// Signal the worker and everything left in its process group.
    fn signal_group(&self, signal: Signal) {
        let Ok(raw) = i32::try_from(self.pid()) else {
            return;
        };
        match killpg(Pid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                warn!(
                    worker = self.index,
                    pid = raw,
                    ?signal,
                    error = %err,
                    "failed to signal worker group"
                );
            }
        }
    }

    /// Reap the worker if it has already exited. Never blocks.
    fn try_reap(&mut self) -> bool {
        if self.reaped {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(worker = self.index, pid = self.pid(), %status, "worker reaped");
                self.reaped = true;
            }
            Ok(None) => {}
            Err(err) => {
                error!(worker = self.index, error = %err, "failed to reap worker");
                self.reaped = true;
            }
        }
        self.reaped
    }

    /// Wait for an exit the group has already been sent SIGKILL for.
    fn force_reap(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(err) = self.child.wait() {
            error!(worker = self.index, error = %err, "failed to reap worker");
        }
        self.reaped = true;
    }

    /// Give the worker until `deadline` to exit on its own, then kill its
    /// process group.
    fn reap_by(&mut self, deadline: Instant) {
        while !self.try_reap() {
            if Instant::now() >= deadline {
                warn!(worker = self.index, pid = self.pid(), "worker lingering; killing");
                self.signal_group(Signal::SIGKILL);
                self.force_reap();
                return;
            }
            thread::sleep(REAP_POLL);
        }
    }
}

pub(crate) struct Broker {
    shared: Arc<Shared>,
    events: Receiver<BrokerEvent>,
    links: Vec<WorkerLink>,
    idle: VecDeque<usize>,
    pending: HashMap<u64, TaskFuture<Value>>,
    draining: bool,
}

impl Broker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        events: Receiver<BrokerEvent>,
        links: Vec<WorkerLink>,
    ) -> Self {
        let idle = (0..links.len()).collect();
        Self {
            shared,
            events,
            links,
            idle,
            pending: HashMap::new(),
            draining: false,
        }
    }

    pub(crate) fn run(mut self) {
        info!(workers = self.links.len(), "broker started");

        loop {
            let Ok(event) = self.events.recv() else {
                warn!("broker event channel closed");
                break;
            };

            if self.shared.terminating.load(Ordering::SeqCst) {
                self.terminate_workers();
                break;
            }

            self.handle(event);
            self.reap_exited();
            self.dispatch();

            if self.draining && self.live_workers() == 0 {
                break;
            }
        }

        self.finish();
        info!("broker exited");
    }

    /// Pick up workers that closed their output before they exited.
    fn reap_exited(&mut self) {
        for link in self.links.iter_mut().filter(|l| !l.alive) {
            link.try_reap();
        }
    }

    fn live_workers(&self) -> usize {
        self.links.iter().filter(|l| l.alive).count()
    }

    fn handle(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Wake => {}
            BrokerEvent::Response { worker, response } => self.on_response(worker, response),
            BrokerEvent::WorkerExited { worker } => self.on_worker_exited(worker),
        }
    }

    fn on_response(&mut self, worker: usize, response: WorkerResponse) {
        let WorkerResponse { future_id, outcome } = response;

        let link = &mut self.links[worker];
        if link.in_flight == Some(future_id) {
            link.in_flight = None;
            if link.alive && link.stdin.is_some() && !self.draining {
                self.idle.push_back(worker);
            }
        }

        let Some(future) = self.pending.remove(&future_id) else {
            warn!(worker, future_id, "response for unknown future");
            return;
        };

        let recorded = match outcome {
            WireOutcome::Ok(value) => future.set_result(value),
            WireOutcome::Error(err) => future.set_exception(TaskError::Remote(err)),
        };
        if let Err(err) = recorded {
            error!(future_id, error = %err, "failed to record task outcome");
        }
    }

    fn on_worker_exited(&mut self, worker: usize) {
        let link = &mut self.links[worker];
        if !link.alive {
            return;
        }
        link.alive = false;
        link.stdin = None;
        let pid = link.pid();
        let in_flight = link.in_flight.take();
        self.idle.retain(|&i| i != worker);

        if let Some(future_id) = in_flight {
            warn!(worker, pid, future_id, "worker died while running a task");
            self.fail(
                future_id,
                RemoteError::new(
                    RemoteErrorKind::WorkerDied,
                    format!("worker {worker} (pid {pid}) exited while running the task"),
                ),
            );
        } else if !self.draining {
            warn!(worker, pid, "worker exited unexpectedly");
        }

        if !self.draining && self.live_workers() == 0 {
            error!("no worker processes left; pool is broken");
            self.shared.broken.store(true, Ordering::SeqCst);
        }
    }

    fn fail(&mut self, future_id: u64, err: RemoteError) {
        if let Some(future) = self.pending.remove(&future_id) {
            if let Err(e) = future.set_exception(TaskError::Remote(err)) {
                error!(future_id, error = %e, "failed to record task outcome");
            }
        }
    }

    /// Hand queued calls to idle workers.
    fn dispatch(&mut self) {
        if self.draining {
            return;
        }

        if self.live_workers() == 0 {
            self.fail_queued();
            return;
        }

        while let Some(&worker) = self.idle.front() {
            let Some(entry) = self.shared.queue.pop() else {
                break;
            };
            let Some(call) = entry else {
                self.begin_drain();
                return;
            };
            let PendingCall {
                future_id,
                call,
                future,
            } = call;

            if !future.set_running_or_notify_cancel() {
                debug!(future_id, "skipping cancelled task");
                continue;
            }

            self.idle.pop_front();
            let request = WorkerRequest::Run {
                future_id,
                task: call.task,
                args: call.args,
            };
            self.pending.insert(future_id, future);

            let link = &mut self.links[worker];
            match link.send(&request) {
                Ok(()) => {
                    link.in_flight = Some(future_id);
                    debug!(worker, future_id, "task dispatched");
                }
                Err(err) => {
                    warn!(worker, error = %err, "failed to write to worker");
                    // Closing the pipe lets the worker hit EOF; its reader then
                    // reports the exit.
                    link.stdin = None;
                    link.signal_group(Signal::SIGKILL);
                    self.fail(
                        future_id,
                        RemoteError::new(
                            RemoteErrorKind::WorkerDied,
                            format!("could not send task to worker {worker}: {err}"),
                        ),
                    );
                }
            }
        }
    }

    /// No worker is left to run anything: fail whatever is queued.
    fn fail_queued(&mut self) {
        while let Some(entry) = self.shared.queue.pop() {
            match entry {
                Some(PendingCall { future, .. }) => {
                    if future.set_running_or_notify_cancel() {
                        let err = RemoteError::new(
                            RemoteErrorKind::WorkerDied,
                            "no worker processes left in the pool",
                        );
                        if let Err(e) = future.set_exception(TaskError::Remote(err)) {
                            error!(error = %e, "failed to record task outcome");
                        }
                    }
                }
                None => self.draining = true,
            }
        }
    }

    /// Ask every worker to exit once its current task is done.
    fn begin_drain(&mut self) {
        debug!("draining workers");
        self.draining = true;
        self.idle.clear();
        for link in self.links.iter_mut().filter(|l| l.alive) {
            if let Err(err) = link.send(&WorkerRequest::Exit) {
                debug!(worker = link.index, error = %err, "exit request not delivered");
            }
            link.stdin = None;
        }
    }

    /// SIGTERM every worker's process group, give them [`REAP_GRACE`] to
    /// exit, then SIGKILL whatever is left of each group.
    fn terminate_workers(&mut self) {
        warn!(in_flight = self.pending.len(), "terminating worker processes");
        for link in self.links.iter_mut().filter(|l| !l.reaped) {
            link.stdin = None;
            link.signal_group(Signal::SIGTERM);
        }

        let deadline = Instant::now() + REAP_GRACE;
        for link in self.links.iter_mut().filter(|l| !l.reaped) {
            link.reap_by(deadline);
            // Task commands that outlived their worker.
            link.signal_group(Signal::SIGKILL);
            link.alive = false;
            link.in_flight = None;
        }

        let ids: Vec<u64> = self.pending.keys().copied().collect();
        for future_id in ids {
            self.fail(
                future_id,
                RemoteError::new(RemoteErrorKind::Terminated, "process pool was terminated"),
            );
        }
    }

    fn finish(&mut self) {
        while let Some(entry) = self.shared.queue.pop() {
            if let Some(PendingCall { future, .. }) = entry {
                future.cancel();
            }
        }

        let deadline = Instant::now() + REAP_GRACE;
        for link in &mut self.links {
            link.stdin = None;
            link.reap_by(deadline);
            link.alive = false;
            if let Some(reader) = link.reader.take() {
                join_with_poll(reader, &format!("runwarden-reader-{}", link.index));
            }
        }
    }
}

fn read_responses(worker: usize, stdout: ChildStdout, events: Sender<BrokerEvent>) {
    let mut input = BufReader::new(stdout);
    loop {
        match read_message::<_, WorkerResponse>(&mut input) {
            Ok(Some(response)) => {
                if events.send(BrokerEvent::Response { worker, response }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                warn!(worker, error = %err, "discarding malformed worker output");
            }
            Err(err) => {
                warn!(worker, error = %err, "lost worker output pipe");
                break;
            }
        }
    }
    let _ = events.send(BrokerEvent::WorkerExited { worker });
}
