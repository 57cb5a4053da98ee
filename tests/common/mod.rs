#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use runwarden::config::JobSpec;
use runwarden::executor::{ProcessPoolExecutor, WorkerCommand};

pub use runwarden_test_utils::init_tracing;

/// The built `runwarden` binary in worker mode.
pub fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_runwarden")).arg("worker")
}

pub fn process_pool(max_workers: usize) -> ProcessPoolExecutor {
    ProcessPoolExecutor::new(max_workers, worker_command()).expect("process pool should start")
}

/// A job running `script` through `sh -c`.
pub fn shell_job(name: &str, script: &str) -> JobSpec {
    JobSpec::new(name, ["sh", "-c", script])
}

/// Generous upper bound for things that should happen "soon".
pub const SOON: Duration = Duration::from_secs(10);

/// Is `pid` a live process? Zombies count as gone.
pub fn process_alive(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    let state = stat
        .rfind(')')
        .and_then(|at| stat[at + 1..].split_whitespace().next());
    !matches!(state, None | Some("Z") | Some("X"))
}

/// Poll until `pid` is gone; false if it is still alive after `within`.
pub fn wait_until_gone(pid: u32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
    true
}

/// Poll `path` until it holds a pid written by a job.
pub fn read_pid_file(path: &std::path::Path, within: Duration) -> u32 {
    let deadline = Instant::now() + within;
    loop {
        if let Some(pid) = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            return pid;
        }
        assert!(Instant::now() < deadline, "{} never got a pid", path.display());
        thread::sleep(Duration::from_millis(10));
    }
}
