pub mod builders;

use std::sync::{Mutex, Once};

use runwarden::supervisor::{OutputHandler, ShutdownSignal, SignalStrategy};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Output handler that remembers everything it was told.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub timeouts: usize,
    /// `is_done()` turns true once a stdout line contains this.
    pub done_marker: Option<String>,
    done: bool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn done_on(marker: &str) -> Self {
        Self {
            done_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    /// Stdout as one string.
    pub fn stdout_text(&self) -> String {
        self.stdout.concat()
    }
}

impl OutputHandler for RecordingHandler {
    fn handle_stdout(&mut self, line: &str) {
        if let Some(marker) = &self.done_marker {
            if line.contains(marker.as_str()) {
                self.done = true;
            }
        }
        self.stdout.push(line.to_string());
    }

    fn handle_stderr(&mut self, line: &str) {
        self.stderr.push(line.to_string());
    }

    fn handle_timeout(&mut self) {
        self.timeouts += 1;
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// Signal strategy that records what it was asked to send and sends
/// nothing. A child supervised with it behaves like one that ignores every
/// signal, SIGKILL included.
#[derive(Debug, Default)]
pub struct SwallowSignals {
    delivered: Mutex<Vec<(u32, ShutdownSignal)>>,
}

impl SwallowSignals {
    pub fn delivered(&self) -> Vec<(u32, ShutdownSignal)> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl SignalStrategy for SwallowSignals {
    fn deliver(&self, pid: u32, signal: ShutdownSignal) -> std::io::Result<()> {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((pid, signal));
        }
        Ok(())
    }
}
