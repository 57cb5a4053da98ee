// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;
use crate::types::{ExecutorKind, parse_duration};

/// Command-line arguments for `runwarden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runwarden",
    version,
    about = "Run external commands under deadlines, alone or as a parallel batch.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNWARDEN_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Supervise one command, passing its output through.
    Run(RunArgs),

    /// Run every job of a batch file.
    Batch(BatchArgs),

    /// Serve process-pool requests on stdin/stdout.
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Kill the command after this long (e.g. `30s`, `10m`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Kill the command after this long without output.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub output_timeout: Option<Duration>,

    /// Grace period between SIGTERM, SIGKILL and giving up.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "5s")]
    pub shutdown_wait: Duration,

    /// The command and its arguments.
    #[arg(required = true, last = true, value_name = "ARGV")]
    pub argv: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    /// Path to the batch file (TOML).
    ///
    /// Default: `Runwarden.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Override `[config].executor`.
    #[arg(long, value_enum, value_name = "KIND")]
    pub executor: Option<ExecutorKind>,

    /// Override `[config].max_workers`.
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Cancel jobs that have not started once one fails.
    #[arg(long)]
    pub fail_fast: bool,

    /// Run only the named job; may be repeated.
    #[arg(long, value_name = "NAME")]
    pub only: Vec<String>,

    /// Do not echo job output while it runs.
    #[arg(long)]
    pub quiet: bool,

    /// Parse + validate, print the jobs, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
