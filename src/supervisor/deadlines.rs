// src/supervisor/deadlines.rs

//! The three independent deadlines a supervised run is measured against.
//!
//! All checks take `now` from the caller, captured at poll time.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadlines {
    /// Longest allowed silence on stdout and stderr.
    pub output: Option<Instant>,
    /// Absolute completion deadline.
    pub finish: Option<Instant>,
    /// Time the current escalation step has to take effect.
    pub shutdown: Option<Instant>,
}

impl Deadlines {
    /// The set deadlines, earliest first.
    pub fn sorted(&self) -> Vec<Instant> {
        let mut all: Vec<Instant> = [self.output, self.finish, self.shutdown]
            .into_iter()
            .flatten()
            .collect();
        all.sort();
        all
    }

    pub fn next(&self) -> Option<Instant> {
        self.sorted().first().copied()
    }

    /// How long a poll may block: until the next deadline, never past
    /// `ceiling`.
    pub fn poll_timeout(&self, now: Instant, ceiling: Duration) -> Duration {
        match self.next() {
            Some(at) => at.saturating_duration_since(now).min(ceiling),
            None => ceiling,
        }
    }

    /// True once the output or finish deadline has passed.
    pub fn run_expired(&self, now: Instant) -> bool {
        self.output.is_some_and(|at| now >= at) || self.finish.is_some_and(|at| now >= at)
    }

    /// True while the current escalation step is still within its grace.
    pub fn shutdown_pending(&self, now: Instant) -> bool {
        self.shutdown.is_some_and(|at| now < at)
    }

    /// Drop the output and finish deadlines once escalation has begun.
    pub fn clear_run(&mut self) {
        self.output = None;
        self.finish = None;
    }
}
