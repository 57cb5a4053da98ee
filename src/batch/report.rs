// src/batch/report.rs

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Passed,
    Failed,
    TimedOut,
    Abandoned,
    /// Never started: cancelled by fail-fast or an interrupt.
    Cancelled,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Passed => "PASS",
            JobStatus::Failed => "FAIL",
            JobStatus::TimedOut => "TIMEOUT",
            JobStatus::Abandoned => "ABANDONED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

/// What happened to one job. Serializable so it can come back from a
/// worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub name: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    /// Last lines of combined output.
    #[serde(default)]
    pub tail: Vec<String>,
}

impl JobReport {
    pub fn cancelled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Cancelled,
            exit_code: None,
            elapsed_ms: 0,
            tail: Vec::new(),
        }
    }

    /// The job could not be run or its result could not be retrieved.
    pub fn errored(name: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Failed,
            exit_code: None,
            elapsed_ms: 0,
            tail: vec![format!("error: {error}")],
        }
    }

    pub fn passed(&self) -> bool {
        self.status == JobStatus::Passed
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub reports: Vec<JobReport>,
}

impl BatchSummary {
    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(JobReport::passed)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    pub fn report(&self, name: &str) -> Option<&JobReport> {
        self.reports.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            write!(f, "{:<9} {}", report.status.label(), report.name)?;
            if let Some(code) = report.exit_code {
                write!(f, " (exit {code})")?;
            }
            if report.status != JobStatus::Cancelled {
                write!(f, " [{:.1}s]", report.elapsed().as_secs_f64())?;
            }
            writeln!(f)?;
            if !report.passed() && report.status != JobStatus::Cancelled {
                for line in &report.tail {
                    writeln!(f, "    | {}", line.trim_end())?;
                }
            }
        }
        write!(
            f,
            "{} passed, {} failed, {} timed out, {} abandoned, {} cancelled",
            self.count(JobStatus::Passed),
            self.count(JobStatus::Failed),
            self.count(JobStatus::TimedOut),
            self.count(JobStatus::Abandoned),
            self.count(JobStatus::Cancelled),
        )
    }
}
