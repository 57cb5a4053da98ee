// src/supervisor/mod.rs

//! Running one external process under output, finish and shutdown
//! deadlines.
//!
//! [`ProcessSupervisor::run`] is a single-threaded poll loop over the
//! child's stdout and stderr pipes. Lines go to an [`OutputHandler`]. When a
//! deadline fires, or the handler reports it is done, the supervisor
//! escalates:
//!
//! `Running -> TimedOut -> SendingSigterm -> SendingSigkill -> Abandoned`
//!
//! with `Finished` reachable from any non-abandoned state once both pipes
//! are closed and the process has been reaped. The child is only waited on
//! after both pipes are closed, so a child blocked on a full pipe can never
//! deadlock the supervisor.

pub mod deadlines;
pub mod handler;
pub mod launch;
pub mod lines;
pub mod signals;
pub mod state;

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{SigHandler, Signal, signal};
use tracing::{debug, error, info, warn};

use crate::errors::SupervisorError;

pub use deadlines::Deadlines;
pub use handler::{NullHandler, OutputHandler, PassthroughHandler};
pub use launch::{CommandSpec, SupervisorContext};
pub use lines::{LineBuffer, LineStream};
pub use signals::{DirectSignal, ShutdownSignal, SignalStrategy, WrapperAware};
pub use state::SupervisorState;

/// Default grace period for each escalation step, in seconds.
pub const SHUTDOWN_WAIT_SECONDS: u64 = 5;

/// Longest a single poll may block, deadlines or not.
pub const POLL_CEILING: Duration = Duration::from_secs(5);

/// Grace periods are capped here; about 34 years.
const LONGEST_GRACE: Duration = Duration::from_secs(1 << 30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Absolute limit on the run.
    pub timeout: Option<Duration>,
    /// Longest allowed silence on both streams.
    pub output_timeout: Option<Duration>,
    /// Once shutdown starts, drain remaining output without reporting it.
    pub stop_on_done: bool,
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own or after the handler reported done.
    Exited(ExitStatus),
    /// A deadline fired and the process was brought down.
    TimedOut(ExitStatus),
    /// Neither SIGTERM nor SIGKILL brought the process down; it was left
    /// unreaped.
    Abandoned { pid: u32 },
}

impl RunOutcome {
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            RunOutcome::Exited(status) | RunOutcome::TimedOut(status) => Some(*status),
            RunOutcome::Abandoned { .. } => None,
        }
    }

    /// Exit code, or `-signal` when the process was killed by a signal.
    pub fn returncode(&self) -> Option<i32> {
        self.exit_status().and_then(returncode)
    }
}

fn returncode(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| -sig))
}

#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    stdout: bool,
    stderr: bool,
}

impl Readiness {
    fn any(self) -> bool {
        self.stdout || self.stderr
    }
}

pub struct ProcessSupervisor {
    child: Child,
    pid: u32,
    program: String,
    stdout: LineStream<ChildStdout>,
    stderr: LineStream<ChildStderr>,
    state: SupervisorState,
    deadlines: Deadlines,
    shutdown_wait: Duration,
    signaller: Arc<dyn SignalStrategy>,
    status: Option<ExitStatus>,
    timed_out: bool,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("state", &self.state)
            .finish()
    }
}

impl ProcessSupervisor {
    /// Start `spec` with stdin from `/dev/null` and both outputs piped.
    ///
    /// The child starts with the default SIGINT disposition whatever this
    /// process has installed.
    pub fn spawn(spec: &CommandSpec, ctx: &SupervisorContext) -> Result<Self, SupervisorError> {
        let (program, args) = spec
            .argv()
            .split_first()
            .ok_or(SupervisorError::EmptyCommand)?;

        ctx.audit.record(spec);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(spec.env_vars().iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = spec.working_dir() {
            cmd.current_dir(dir);
        }
        // Worker processes ignore SIGINT and that disposition survives exec.
        // SAFETY: the hook only calls signal(2), which is async-signal-safe.
        unsafe {
            cmd.pre_exec(|| {
                signal(Signal::SIGINT, SigHandler::SigDfl)
                    .map(drop)
                    .map_err(io::Error::from)
            });
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or(SupervisorError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SupervisorError::MissingPipe("stderr"))?;

        debug!(pid, program = %program, "process started");

        Ok(Self {
            child,
            pid,
            program: program.clone(),
            stdout: LineStream::new("stdout", stdout),
            stderr: LineStream::new("stderr", stderr),
            state: SupervisorState::Running,
            deadlines: Deadlines::default(),
            shutdown_wait: ctx.shutdown_wait,
            signaller: Arc::clone(&ctx.signaller),
            status: None,
            timed_out: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Exit code, or `-signal`; `None` until the process has been reaped.
    pub fn returncode(&self) -> Option<i32> {
        self.status.and_then(returncode)
    }

    /// Drive the process to completion, streaming its output into `handler`.
    pub fn run(
        &mut self,
        handler: &mut dyn OutputHandler,
        options: RunOptions,
    ) -> Result<RunOutcome, SupervisorError> {
        let started = Instant::now();
        // A limit too large to represent never fires.
        self.deadlines.finish = options.timeout.and_then(|t| started.checked_add(t));
        self.deadlines.output = options.output_timeout.and_then(|t| started.checked_add(t));

        let mut null = NullHandler;
        let mut active: &mut dyn OutputHandler = handler;
        let mut muted = false;

        while self.streams_open() {
            let ceiling = active.poll_ceiling().map_or(POLL_CEILING, |c| c.min(POLL_CEILING));
            let wait = self.deadlines.poll_timeout(Instant::now(), ceiling);
            let ready = self.poll_streams(wait);
            let delivered = self.deliver(ready, active);

            let now = Instant::now();
            if delivered {
                if let (Some(output_timeout), SupervisorState::Running) =
                    (options.output_timeout, self.state)
                {
                    self.deadlines.output = now.checked_add(output_timeout);
                }
            } else {
                if self.state == SupervisorState::Running && self.deadlines.run_expired(now) {
                    warn!(
                        pid = self.pid,
                        program = %self.program,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "deadline expired"
                    );
                    active.handle_timeout();
                    self.timed_out = true;
                    self.set_state(SupervisorState::TimedOut);
                }

                if self.child.try_wait()?.is_some() {
                    debug!(pid = self.pid, "process exited; draining remaining output");
                    self.drain_and_close(active);
                    break;
                }
            }

            if active.is_done() || self.state.is_shutting_down() {
                if options.stop_on_done && !muted {
                    debug!(pid = self.pid, "muting output handler");
                    muted = true;
                    active = &mut null;
                }
                if self.advance_shutdown(now) == SupervisorState::Abandoned {
                    return Ok(RunOutcome::Abandoned { pid: self.pid });
                }
            }
        }

        let status = self.child.wait()?;
        self.status = Some(status);
        self.set_state(SupervisorState::Finished);
        info!(
            pid = self.pid,
            program = %self.program,
            %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "process finished"
        );

        Ok(if self.timed_out {
            RunOutcome::TimedOut(status)
        } else {
            RunOutcome::Exited(status)
        })
    }

    fn streams_open(&self) -> bool {
        self.stdout.is_open() || self.stderr.is_open()
    }

    fn set_state(&mut self, state: SupervisorState) {
        debug!(pid = self.pid, from = %self.state, to = %state, "state change");
        self.state = state;
    }

    /// Take the next escalation step if the previous one has had its time.
    fn advance_shutdown(&mut self, now: Instant) -> SupervisorState {
        if self.deadlines.shutdown_pending(now) {
            return self.state;
        }
        self.deadlines.clear_run();

        let signal = if self.state < SupervisorState::SendingSigterm {
            self.set_state(SupervisorState::SendingSigterm);
            ShutdownSignal::Terminate
        } else if self.state < SupervisorState::SendingSigkill {
            self.set_state(SupervisorState::SendingSigkill);
            ShutdownSignal::Kill
        } else {
            error!(
                pid = self.pid,
                program = %self.program,
                "process survived SIGTERM and SIGKILL; abandoning it"
            );
            self.set_state(SupervisorState::Abandoned);
            return self.state;
        };

        info!(pid = self.pid, %signal, "sending shutdown signal");
        if let Err(err) = self.signaller.deliver(self.pid, signal) {
            warn!(pid = self.pid, %signal, error = %err, "failed to deliver signal");
        }
        self.deadlines.shutdown = now.checked_add(self.shutdown_wait.min(LONGEST_GRACE));
        self.state
    }

    /// Block until a stream is readable or `timeout` passes.
    ///
    /// EINTR counts as a wake-up with nothing ready. Any other poll failure
    /// leaves the supervisor unable to tell what the child is doing, so the
    /// whole process aborts rather than risk leaving it running unwatched.
    fn poll_streams(&self, timeout: Duration) -> Readiness {
        let mut fds = Vec::with_capacity(2);
        let mut slots = Vec::with_capacity(2);
        if let Some(fd) = self.stdout.fd() {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
            slots.push(true);
        }
        if let Some(fd) = self.stderr.fd() {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
            slots.push(false);
        }

        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut ready = Readiness::default();
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => {}
            Ok(_) => {
                for (fd, is_stdout) in fds.iter().zip(slots) {
                    let hit = fd.revents().is_some_and(|r| {
                        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                    });
                    if hit && is_stdout {
                        ready.stdout = true;
                    } else if hit {
                        ready.stderr = true;
                    }
                }
            }
            Err(Errno::EINTR) => debug!(pid = self.pid, "poll interrupted"),
            Err(errno) => {
                error!(pid = self.pid, error = %errno, "poll on child output failed; aborting");
                std::process::abort();
            }
        }
        ready
    }

    /// Read once from each ready stream and hand complete lines over.
    fn deliver(&mut self, ready: Readiness, handler: &mut dyn OutputHandler) -> bool {
        let mut delivered = false;
        if ready.stdout {
            for line in self.stdout.read_available() {
                handler.handle_stdout(&line);
                delivered = true;
            }
        }
        if ready.stderr {
            for line in self.stderr.read_available() {
                handler.handle_stderr(&line);
                delivered = true;
            }
        }
        delivered
    }

    /// The process has exited: take whatever is already in the pipes, then
    /// close them. Never blocks, even if a grandchild still holds a pipe.
    fn drain_and_close(&mut self, handler: &mut dyn OutputHandler) {
        loop {
            let ready = self.poll_streams(Duration::ZERO);
            if !ready.any() {
                break;
            }
            self.deliver(ready, handler);
            if !self.streams_open() {
                break;
            }
        }
        for line in self.stdout.close() {
            handler.handle_stdout(&line);
        }
        for line in self.stderr.close() {
            handler.handle_stderr(&line);
        }
    }
}
