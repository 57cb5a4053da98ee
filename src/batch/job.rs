// src/batch/job.rs

//! Running a single job under the supervisor.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::ABORT_POLL;
use crate::batch::report::{JobReport, JobStatus};
use crate::config::JobSpec;
use crate::supervisor::{OutputHandler, ProcessSupervisor, RunOutcome, SupervisorContext};

/// Lines of output kept for the report.
pub const TAIL_LINES: usize = 20;

/// Where job output is echoed while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Echo {
    #[default]
    Off,
    /// stdout lines to stdout, stderr lines to stderr.
    Inherit,
    /// Everything to stderr; used where stdout is reserved.
    Stderr,
}

pub struct JobOutputHandler {
    name: String,
    echo: Echo,
    done_pattern: Option<Regex>,
    matched: bool,
    timed_out: bool,
    tail: VecDeque<String>,
    abort: Arc<AtomicBool>,
}

impl JobOutputHandler {
    pub fn new(
        name: impl Into<String>,
        echo: Echo,
        done_pattern: Option<Regex>,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.into(),
            echo,
            done_pattern,
            matched: false,
            timed_out: false,
            tail: VecDeque::with_capacity(TAIL_LINES),
            abort,
        }
    }

    pub fn matched(&self) -> bool {
        self.matched
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn tail(&self) -> Vec<String> {
        self.tail.iter().cloned().collect()
    }

    fn remember(&mut self, line: &str) {
        if self.tail.len() == TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }

    fn echo_line(&self, line: &str, is_stdout: bool) {
        let text = format!("[{}] {}\n", self.name, line.trim_end_matches(['\r', '\n']));
        match (self.echo, is_stdout) {
            (Echo::Off, _) => {}
            (Echo::Inherit, true) => {
                let _ = std::io::stdout().lock().write_all(text.as_bytes());
            }
            (Echo::Inherit, false) | (Echo::Stderr, _) => {
                let _ = std::io::stderr().lock().write_all(text.as_bytes());
            }
        }
    }
}

impl OutputHandler for JobOutputHandler {
    fn handle_stdout(&mut self, line: &str) {
        self.echo_line(line, true);
        self.remember(line);
        if !self.matched
            && self
                .done_pattern
                .as_ref()
                .is_some_and(|re| re.is_match(line.trim_end_matches(['\r', '\n'])))
        {
            debug!(job = %self.name, "done pattern matched");
            self.matched = true;
        }
    }

    fn handle_stderr(&mut self, line: &str) {
        self.echo_line(line, false);
        self.remember(line);
    }

    fn handle_timeout(&mut self) {
        warn!(job = %self.name, "job timed out");
        self.timed_out = true;
    }

    fn is_done(&self) -> bool {
        self.matched || self.abort.load(Ordering::SeqCst)
    }

    fn poll_ceiling(&self) -> Option<Duration> {
        Some(ABORT_POLL)
    }
}

/// Spawn `spec`, supervise it to the end and report.
///
/// A job whose done pattern matched counts as passed however the process
/// then went down.
pub fn run_job(
    spec: &JobSpec,
    ctx: &SupervisorContext,
    echo: Echo,
    abort: Arc<AtomicBool>,
) -> anyhow::Result<JobReport> {
    let done_pattern = spec
        .done_on_stdout
        .as_deref()
        .map(Regex::new)
        .transpose()
        .with_context(|| format!("job '{}': invalid done_on_stdout", spec.name))?;

    let started = Instant::now();
    let mut supervisor = ProcessSupervisor::spawn(&spec.command(), ctx)
        .with_context(|| format!("job '{}': failed to start", spec.name))?;
    info!(job = %spec.name, pid = supervisor.pid(), "job started");

    let mut handler = JobOutputHandler::new(&spec.name, echo, done_pattern, abort);
    let outcome = supervisor
        .run(&mut handler, spec.run_options())
        .with_context(|| format!("job '{}': supervision failed", spec.name))?;

    let status = match outcome {
        RunOutcome::Abandoned { .. } => JobStatus::Abandoned,
        RunOutcome::TimedOut(_) => JobStatus::TimedOut,
        RunOutcome::Exited(_) if handler.matched() => JobStatus::Passed,
        RunOutcome::Exited(status) if status.success() => JobStatus::Passed,
        RunOutcome::Exited(_) => JobStatus::Failed,
    };

    let report = JobReport {
        name: spec.name.clone(),
        status,
        exit_code: outcome.returncode(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        tail: handler.tail(),
    };
    info!(
        job = %report.name,
        status = report.status.label(),
        exit_code = ?report.exit_code,
        elapsed_ms = report.elapsed_ms,
        "job finished"
    );
    Ok(report)
}
