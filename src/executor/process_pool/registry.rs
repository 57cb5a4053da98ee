// src/executor/process_pool/registry.rs

//! Named tasks that worker processes know how to run.
//!
//! Closures cannot cross a process boundary, so the process pool submits a
//! task *name* plus JSON arguments and the worker looks the name up here.
//! A registry is an explicit value handed to the worker loop; there is no
//! process-wide table.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};

pub type TaskFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static>;

/// Arguments did not match what the task expects.
#[derive(Debug, thiserror::Error)]
#[error("invalid arguments for task '{task}': {reason}")]
pub struct BadArguments {
    pub task: String,
    pub reason: String,
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskFn>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the general-purpose tasks every worker understands.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Ok);
        registry.register_typed("sleep", |args: SleepArgs| {
            thread::sleep(Duration::from_secs_f64(args.secs.max(0.0)));
            Ok(Value::Null)
        });
        registry.register_typed("touch", |args: TouchArgs| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&args.path)
                .with_context(|| format!("touching {:?}", args.path))?;
            Ok(json!(args.path))
        });
        registry.register_typed("fail", |args: FailArgs| Err(anyhow!(args.message)));
        registry.register_typed("panic", |args: FailArgs| -> anyhow::Result<Value> {
            panic!("{}", args.message)
        });
        // Simulates a worker crash mid-task.
        registry.register_typed("exit", |args: ExitArgs| -> anyhow::Result<Value> {
            std::process::exit(args.code)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, task: F) -> &mut Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(task));
        self
    }

    /// Register a task whose arguments are decoded into `A` first.
    ///
    /// Decoding failures surface as [`BadArguments`].
    pub fn register_typed<A, F>(&mut self, name: &str, task: F) -> &mut Self
    where
        A: for<'de> Deserialize<'de>,
        F: Fn(A) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let task_name = name.to_string();
        self.register(name, move |args: Value| {
            let args: A = serde_json::from_value(args).map_err(|e| BadArguments {
                task: task_name.clone(),
                reason: e.to_string(),
            })?;
            task(args)
        })
    }

    pub fn get(&self, name: &str) -> Option<&TaskFn> {
        self.tasks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct SleepArgs {
    secs: f64,
}

#[derive(Debug, Deserialize)]
struct TouchArgs {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct FailArgs {
    #[serde(default = "default_fail_message")]
    message: String,
}

fn default_fail_message() -> String {
    "task failed".to_string()
}

#[derive(Debug, Deserialize)]
struct ExitArgs {
    #[serde(default = "default_exit_code")]
    code: i32,
}

fn default_exit_code() -> i32 {
    1
}
