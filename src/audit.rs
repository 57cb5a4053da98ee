// src/audit.rs

//! Launch logging: every supervised command is logged as a shell command
//! line that can be pasted back into a terminal, with secrets masked.

use std::borrow::Cow;

use tracing::info;

use crate::supervisor::launch::CommandSpec;

pub const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone)]
pub struct CommandAudit {
    sensitive_flags: Vec<String>,
}

impl Default for CommandAudit {
    fn default() -> Self {
        Self::new(["--password", "--token", "--api-key", "--secret"])
    }
}

impl CommandAudit {
    pub fn new<I, S>(sensitive_flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sensitive_flags: sensitive_flags.into_iter().map(Into::into).collect(),
        }
    }

    /// Mask the values of sensitive flags, in both `--flag value` and
    /// `--flag=value` form.
    pub fn redact(&self, argv: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(argv.len());
        let mut mask_next = false;
        for arg in argv {
            if mask_next {
                out.push(REDACTED.to_string());
                mask_next = false;
                continue;
            }
            if self.sensitive_flags.iter().any(|f| f == arg) {
                mask_next = true;
                out.push(arg.clone());
                continue;
            }
            match arg.split_once('=') {
                Some((flag, _)) if self.sensitive_flags.iter().any(|f| f == flag) => {
                    out.push(format!("{flag}={REDACTED}"));
                }
                _ => out.push(arg.clone()),
            }
        }
        out
    }

    /// `cd DIR && K=V ... argv...`, shell-quoted.
    pub fn render(&self, spec: &CommandSpec) -> String {
        let mut parts = Vec::new();
        if let Some(dir) = spec.working_dir() {
            parts.push(format!("cd {} &&", quote(&dir.to_string_lossy())));
        }
        for (key, value) in spec.env_vars() {
            parts.push(format!("{key}={}", quote(value)));
        }
        parts.extend(self.redact(spec.argv()).iter().map(|a| quote(a).into_owned()));
        parts.join(" ")
    }

    pub fn record(&self, spec: &CommandSpec) {
        info!(command = %self.render(spec), "launching process");
    }
}

fn quote(word: &str) -> Cow<'_, str> {
    shlex::try_quote(word).unwrap_or_else(|_| Cow::Owned(format!("{word:?}")))
}
