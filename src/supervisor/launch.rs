// src/supervisor/launch.rs

//! What to start and the caller-owned context it is started with.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::CommandAudit;
use crate::supervisor::SHUTDOWN_WAIT_SECONDS;
use crate::supervisor::signals::{DirectSignal, SignalStrategy};

/// Argument vector plus environment and working-directory overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    argv: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// `sh -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(["sh".to_string(), "-c".to_string(), script.into()])
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }
}

/// State shared by every spawn a caller makes.
///
/// Built once by the caller and passed in; the supervisor keeps no
/// process-wide state of its own.
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    pub audit: CommandAudit,
    /// Grace period for each escalation step.
    pub shutdown_wait: Duration,
    pub signaller: Arc<dyn SignalStrategy>,
}

impl Default for SupervisorContext {
    fn default() -> Self {
        Self {
            audit: CommandAudit::default(),
            shutdown_wait: Duration::from_secs(SHUTDOWN_WAIT_SECONDS),
            signaller: Arc::new(DirectSignal),
        }
    }
}

impl SupervisorContext {
    pub fn with_shutdown_wait(mut self, wait: Duration) -> Self {
        self.shutdown_wait = wait;
        self
    }

    pub fn with_signaller(mut self, signaller: Arc<dyn SignalStrategy>) -> Self {
        self.signaller = signaller;
        self
    }

    pub fn with_audit(mut self, audit: CommandAudit) -> Self {
        self.audit = audit;
        self
    }
}
