// src/executor/process_pool/protocol.rs

//! Wire format between the broker and worker processes.
//!
//! One JSON document per line. The broker writes [`WorkerRequest`]s to a
//! worker's stdin; the worker answers with one [`WorkerResponse`] per `run`
//! request on its stdout. Failures travel as a tagged [`WireOutcome`]
//! instead of serialized error objects.

use std::fmt;
use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest {
    Run {
        future_id: u64,
        task: String,
        #[serde(default)]
        args: Value,
    },
    /// Exit sentinel.
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub future_id: u64,
    pub outcome: WireOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireOutcome {
    Ok(Value),
    Error(RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The task returned an error.
    Failed,
    Panicked,
    UnknownTask,
    BadArguments,
    /// The worker process exited while running the task.
    WorkerDied,
    /// The pool was torn down with `terminate()`.
    Terminated,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteErrorKind::Failed => "failed",
            RemoteErrorKind::Panicked => "panicked",
            RemoteErrorKind::UnknownTask => "unknown task",
            RemoteErrorKind::BadArguments => "bad arguments",
            RemoteErrorKind::WorkerDied => "worker died",
            RemoteErrorKind::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Best-effort reconstruction of a failure raised in a worker process.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Write `msg` as a single line and flush.
pub fn write_message<W: Write, M: Serialize>(out: &mut W, msg: &M) -> io::Result<()> {
    serde_json::to_writer(&mut *out, msg)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Read the next non-blank line and decode it. `Ok(None)` on EOF.
pub fn read_message<R, M>(input: &mut R) -> io::Result<Option<M>>
where
    R: BufRead,
    M: for<'de> Deserialize<'de>,
{
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(&line)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
    }
}
