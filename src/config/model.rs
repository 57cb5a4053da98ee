// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::supervisor::{CommandSpec, RunOptions};
use crate::types::ExecutorKind;

/// Top-level batch file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// executor = "process"
/// max_workers = 4
///
/// [default]
/// timeout = "10m"
///
/// [job.unit]
/// cmd = "cargo test"
/// output_timeout = "1m"
/// ```
///
/// All sections are optional and have reasonable defaults; an empty `[job]`
/// table is rejected by validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// All jobs from `[job.<name>]`, keyed by name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    #[serde(default)]
    pub executor: ExecutorKind,

    /// Worker count; defaults to the number of logical CPUs.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Grace period for each escalation step (`"5s"`).
    #[serde(default = "default_shutdown_wait")]
    pub shutdown_wait: String,

    /// Stop scheduling new jobs after the first one that does not pass.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_shutdown_wait() -> String {
    "5s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::default(),
            max_workers: None,
            shutdown_wait: default_shutdown_wait(),
            fail_fast: false,
        }
    }
}

/// `[default]` section: values every job inherits unless it overrides them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultSection {
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub output_timeout: Option<String>,

    /// Merged under each job's own `env`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobConfig {
    /// Shell command, run through `sh -c`.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Explicit argument vector; mutually exclusive with `cmd`.
    #[serde(default)]
    pub argv: Option<Vec<String>>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub output_timeout: Option<String>,

    /// Regex; a matching stdout line marks the job as done.
    #[serde(default)]
    pub done_on_stdout: Option<String>,

    /// Once done, stop reporting output while the process is shut down.
    #[serde(default)]
    pub stop_on_done: bool,
}

/// Validated configuration with every job resolved against `[default]`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    shutdown_wait: Duration,
    jobs: Vec<JobSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        shutdown_wait: Duration,
        jobs: Vec<JobSpec>,
    ) -> Self {
        Self {
            config,
            shutdown_wait,
            jobs,
        }
    }

    pub fn executor(&self) -> ExecutorKind {
        self.config.executor
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers.unwrap_or_else(num_cpus::get)
    }

    pub fn shutdown_wait(&self) -> Duration {
        self.shutdown_wait
    }

    pub fn fail_fast(&self) -> bool {
        self.config.fail_fast
    }

    /// Jobs in name order.
    pub fn job_specs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Everything needed to run one job, in a form that can cross into a worker
/// process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub argv: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub output_timeout: Option<Duration>,
    #[serde(default)]
    pub done_on_stdout: Option<String>,
    #[serde(default)]
    pub stop_on_done: bool,
}

impl JobSpec {
    pub fn new<I, S>(name: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
            output_timeout: None,
            done_on_stdout: None,
            stop_on_done: false,
        }
    }

    pub fn command(&self) -> CommandSpec {
        let spec = CommandSpec::new(self.argv.iter().cloned())
            .envs(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        match &self.cwd {
            Some(dir) => spec.cwd(dir.clone()),
            None => spec,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: self.timeout,
            output_timeout: self.output_timeout,
            stop_on_done: self.stop_on_done,
        }
    }
}
