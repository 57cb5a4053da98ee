// src/supervisor/handler.rs

use std::io::Write;
use std::time::Duration;

/// Receives a supervised process's output and decides when it is done.
///
/// Lines are passed with their terminator, when they had one.
pub trait OutputHandler {
    fn handle_stdout(&mut self, line: &str);

    fn handle_stderr(&mut self, line: &str);

    /// Called at most once, when a deadline fires before the process
    /// signalled completion.
    fn handle_timeout(&mut self) {}

    /// Polled once per loop iteration. `true` starts shutdown escalation.
    fn is_done(&self) -> bool {
        false
    }

    /// Shorter bound on a single poll, for handlers whose `is_done` can
    /// flip without any output arriving.
    fn poll_ceiling(&self) -> Option<Duration> {
        None
    }
}

/// Discards everything. Swapped in once `stop_on_done` takes effect so the
/// remaining output is drained without being reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl OutputHandler for NullHandler {
    fn handle_stdout(&mut self, _line: &str) {}
    fn handle_stderr(&mut self, _line: &str) {}
}

/// Copies lines to this process's own stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughHandler;

impl OutputHandler for PassthroughHandler {
    fn handle_stdout(&mut self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }

    fn handle_stderr(&mut self, line: &str) {
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
    }
}
