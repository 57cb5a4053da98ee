#![allow(dead_code)]

use std::collections::BTreeMap;

use runwarden::config::{ConfigFile, ConfigSection, DefaultSection, JobConfig, RawConfigFile};
use runwarden::types::ExecutorKind;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                default: DefaultSection::default(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.config.job.insert(name.to_string(), job);
        self
    }

    pub fn with_executor(mut self, executor: ExecutorKind) -> Self {
        self.config.config.executor = executor;
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.config.config.max_workers = Some(n);
        self
    }

    pub fn with_shutdown_wait(mut self, wait: &str) -> Self {
        self.config.config.shutdown_wait = wait.to_string();
        self
    }

    pub fn with_fail_fast(mut self, on: bool) -> Self {
        self.config.config.fail_fast = on;
        self
    }

    pub fn with_default_timeout(mut self, timeout: &str) -> Self {
        self.config.default.timeout = Some(timeout.to_string());
        self
    }

    pub fn with_default_env(mut self, key: &str, value: &str) -> Self {
        self.config.default.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    /// A job running `cmd` through `sh -c`.
    pub fn new(cmd: &str) -> Self {
        Self {
            job: JobConfig {
                cmd: Some(cmd.to_string()),
                ..JobConfig::default()
            },
        }
    }

    /// A job with an explicit argument vector.
    pub fn argv(argv: &[&str]) -> Self {
        Self {
            job: JobConfig {
                argv: Some(argv.iter().map(|s| s.to_string()).collect()),
                ..JobConfig::default()
            },
        }
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.job.timeout = Some(timeout.to_string());
        self
    }

    pub fn output_timeout(mut self, timeout: &str) -> Self {
        self.job.output_timeout = Some(timeout.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cwd(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.job.cwd = Some(dir.into());
        self
    }

    pub fn done_on_stdout(mut self, pattern: &str) -> Self {
        self.job.done_on_stdout = Some(pattern.to_string());
        self
    }

    pub fn stop_on_done(mut self, on: bool) -> Self {
        self.job.stop_on_done = on;
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}
