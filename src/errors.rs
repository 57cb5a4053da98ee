// src/errors.rs

//! Crate-wide error types and aliases.
//!
//! - [`TaskError`] is what a submitted unit of work failed with. It is stored
//!   in a future's exception slot and handed back from `result()`.
//! - [`FutureError`] is what retrieving a future's outcome can fail with.
//! - [`ExecutorError`] covers executor misuse and worker start-up.
//! - [`SupervisorError`] covers spawning and driving an external process.
//! - [`RunwardenError`] is the application-level error used by config
//!   loading and the CLI glue.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::executor::process_pool::protocol::RemoteError;
use crate::future::FutureState;

/// Failure of a submitted task.
///
/// Clonable so every holder of a future can observe the same failure.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The task returned an error. The original error is kept so callers can
    /// `downcast_ref` to its concrete type.
    #[error("{0:#}")]
    Raised(Arc<anyhow::Error>),

    /// The task panicked; the payload is rendered as text.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task failed inside a worker process.
    #[error(transparent)]
    Remote(RemoteError),
}

impl TaskError {
    /// Downcast a locally raised error to its concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            TaskError::Raised(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Raised(Arc::new(err))
    }
}

#[derive(Error, Debug, Clone)]
pub enum FutureError {
    #[error("future was cancelled")]
    Cancelled,

    #[error("timed out waiting for future")]
    Timeout,

    #[error(transparent)]
    Failed(#[from] TaskError),

    #[error("cannot {action} a future in state {state:?}")]
    InvalidState {
        state: FutureState,
        action: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("cannot schedule new tasks after shutdown")]
    Shutdown,

    #[error("max_workers must be greater than 0")]
    NoWorkers,

    #[error("failed to start worker: {0}")]
    Spawn(#[from] io::Error),

    #[error("executor is broken: {0}")]
    Broken(String),
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("empty argument vector")]
    EmptyCommand,

    #[error("child process is missing a {0} pipe")]
    MissingPipe(&'static str),

    #[error("IO error while supervising process: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum RunwardenError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunwardenError>;
