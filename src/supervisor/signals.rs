// src/supervisor/signals.rs

//! How escalation signals reach a supervised process.
//!
//! Some commands are launched through a wrapper (for example `xvfb-run`)
//! that does not forward SIGTERM. [`WrapperAware`] also signals the
//! wrapper's direct children so the real workload sees the request.

use std::fmt;
use std::fs;
use std::io;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Graceful: SIGTERM.
    Terminate,
    /// Forceful: SIGKILL.
    Kill,
}

impl ShutdownSignal {
    pub fn as_signal(self) -> Signal {
        match self {
            ShutdownSignal::Terminate => Signal::SIGTERM,
            ShutdownSignal::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_signal().as_str())
    }
}

/// Delivers escalation signals for the supervisor.
pub trait SignalStrategy: Send + Sync + fmt::Debug {
    fn deliver(&self, pid: u32, signal: ShutdownSignal) -> io::Result<()>;
}

/// Signal the process itself and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectSignal;

impl SignalStrategy for DirectSignal {
    fn deliver(&self, pid: u32, signal: ShutdownSignal) -> io::Result<()> {
        send(pid, signal.as_signal())
    }
}

/// Signal the direct children of known wrapper processes, then the process.
#[derive(Debug, Clone)]
pub struct WrapperAware {
    wrappers: Vec<String>,
}

impl Default for WrapperAware {
    fn default() -> Self {
        Self::new(["xvfb-run"])
    }
}

impl WrapperAware {
    pub fn new<I, S>(wrappers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            wrappers: wrappers.into_iter().map(Into::into).collect(),
        }
    }

    fn is_wrapper(&self, pid: u32) -> bool {
        process_name(pid).is_some_and(|name| self.wrappers.iter().any(|w| name_matches(w, &name)))
    }
}

impl SignalStrategy for WrapperAware {
    fn deliver(&self, pid: u32, signal: ShutdownSignal) -> io::Result<()> {
        if self.is_wrapper(pid) {
            for child in child_pids(pid) {
                debug!(pid, child, %signal, "signalling wrapped child");
                send(child, signal.as_signal())?;
            }
        }
        send(pid, signal.as_signal())
    }
}

/// `kill(2)`; a process that is already gone is not an error.
fn send(pid: u32, sig: Signal) -> io::Result<()> {
    let raw = i32::try_from(pid).map_err(|_| io::Error::other(format!("pid {pid} out of range")))?;
    match signal::kill(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// The kernel truncates `comm` to 15 bytes.
fn name_matches(wrapper: &str, comm: &str) -> bool {
    let limit = wrapper.len().min(15);
    comm == wrapper || (comm.len() == 15 && wrapper.len() > 15 && comm == &wrapper[..limit])
}

fn process_name(pid: u32) -> Option<String> {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|s| s.trim_end().to_string())
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
fn parent_of(stat: &str) -> Option<u32> {
    // The command name is parenthesised and may itself contain spaces.
    let after_name = &stat[stat.rfind(')')? + 1..];
    after_name.split_whitespace().nth(1)?.parse().ok()
}

/// Direct children of `pid`, found by scanning `/proc`. Best effort.
fn child_pids(pid: u32) -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|&candidate| {
            fs::read_to_string(format!("/proc/{candidate}/stat"))
                .ok()
                .and_then(|stat| parent_of(&stat))
                == Some(pid)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parent_from_stat() {
        let stat = "4242 (xvfb run (x)) S 17 4242 4242 0 -1";
        assert_eq!(parent_of(stat), Some(17));
        assert_eq!(parent_of("garbage"), None);
    }

    #[test]
    fn comm_truncation() {
        assert!(name_matches("xvfb-run", "xvfb-run"));
        assert!(name_matches("a-very-long-wrapper-name", "a-very-long-wra"));
        assert!(!name_matches("xvfb-run", "bash"));
    }

    #[test]
    fn signalling_a_missing_process_is_ok() {
        // Reap a short-lived child so its pid is (very likely) unused.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(DirectSignal.deliver(pid, ShutdownSignal::Terminate).is_ok());
    }

    #[test]
    fn finds_children_of_current_process() {
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        let children = child_pids(std::process::id());
        let _ = child.kill();
        let _ = child.wait();
        assert!(children.contains(&child.id()));
    }
}
