// src/config/validate.rs

use std::time::Duration;

use regex::Regex;

use crate::config::model::{ConfigFile, DefaultSection, JobConfig, JobSpec, RawConfigFile};
use crate::errors::{Result, RunwardenError};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunwardenError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_jobs(&raw)?;
        let shutdown_wait = validate_global_config(&raw)?;

        let mut jobs = Vec::with_capacity(raw.job.len());
        for (name, job) in &raw.job {
            jobs.push(resolve_job(name, job, &raw.default)?);
        }

        Ok(ConfigFile::new_unchecked(raw.config, shutdown_wait, jobs))
    }
}

fn config_error(msg: impl Into<String>) -> RunwardenError {
    RunwardenError::ConfigError(msg.into())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(config_error(
            "config must contain at least one [job.<name>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<Duration> {
    // executor is strongly typed and validated during deserialization.

    if cfg.config.max_workers == Some(0) {
        return Err(config_error("[config].max_workers must be >= 1 (got 0)"));
    }

    duration_field("[config].shutdown_wait", &cfg.config.shutdown_wait)
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| config_error(format!("{field}: {e}")))
}

fn optional_duration(field: &str, value: Option<&String>) -> Result<Option<Duration>> {
    value.map(|v| duration_field(field, v)).transpose()
}

fn resolve_job(name: &str, job: &JobConfig, defaults: &DefaultSection) -> Result<JobSpec> {
    let argv = match (&job.cmd, &job.argv) {
        (Some(_), Some(_)) => {
            return Err(config_error(format!(
                "job '{name}' sets both `cmd` and `argv`; pick one"
            )));
        }
        (None, None) => {
            return Err(config_error(format!(
                "job '{name}' needs either `cmd` or `argv`"
            )));
        }
        (Some(cmd), None) => {
            if cmd.trim().is_empty() {
                return Err(config_error(format!("job '{name}' has an empty `cmd`")));
            }
            vec!["sh".to_string(), "-c".to_string(), cmd.clone()]
        }
        (None, Some(argv)) => {
            if argv.is_empty() {
                return Err(config_error(format!("job '{name}' has an empty `argv`")));
            }
            argv.clone()
        }
    };

    let timeout = optional_duration(
        &format!("[job.{name}].timeout"),
        job.timeout.as_ref().or(defaults.timeout.as_ref()),
    )?;
    let output_timeout = optional_duration(
        &format!("[job.{name}].output_timeout"),
        job.output_timeout.as_ref().or(defaults.output_timeout.as_ref()),
    )?;

    if let Some(pattern) = &job.done_on_stdout {
        Regex::new(pattern).map_err(|e| {
            config_error(format!("job '{name}' has an invalid `done_on_stdout` regex: {e}"))
        })?;
    }
    if job.stop_on_done && job.done_on_stdout.is_none() {
        return Err(config_error(format!(
            "job '{name}' sets `stop_on_done` without `done_on_stdout`"
        )));
    }

    let mut env = defaults.env.clone();
    env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(JobSpec {
        name: name.to_string(),
        argv,
        cwd: job.cwd.clone(),
        env,
        timeout,
        output_timeout,
        done_on_stdout: job.done_on_stdout.clone(),
        stop_on_done: job.stop_on_done,
    })
}
