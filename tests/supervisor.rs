// tests/supervisor.rs

mod common;

use std::fs;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{SOON, init_tracing, process_alive, wait_until_gone};
use nix::sys::signal::{SigHandler, Signal, kill, signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use runwarden::supervisor::{
    CommandSpec, NullHandler, ProcessSupervisor, RunOptions, RunOutcome, ShutdownSignal,
    SignalStrategy, SupervisorContext, SupervisorState, WrapperAware,
};
use runwarden_test_utils::{RecordingHandler, SwallowSignals};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new(["sh", "-c", script])
}

fn quick_context() -> SupervisorContext {
    SupervisorContext::default().with_shutdown_wait(Duration::from_millis(300))
}

#[test]
fn clean_exit_reports_code_and_output() {
    init_tracing();
    let mut sup = ProcessSupervisor::spawn(&sh("echo one; echo two >&2; exit 3"), &quick_context())
        .unwrap();
    let mut handler = RecordingHandler::new();

    let outcome = sup.run(&mut handler, RunOptions::default()).unwrap();

    assert!(matches!(outcome, RunOutcome::Exited(_)));
    assert_eq!(outcome.returncode(), Some(3));
    assert_eq!(sup.state(), SupervisorState::Finished);
    assert_eq!(sup.returncode(), Some(3));
    assert_eq!(handler.stdout, vec!["one\n"]);
    assert_eq!(handler.stderr, vec!["two\n"]);
    assert_eq!(handler.timeouts, 0);
}

#[test]
fn final_line_without_newline_is_delivered() {
    init_tracing();
    let mut sup = ProcessSupervisor::spawn(&sh("printf 'a\\nb\\nno-newline'"), &quick_context())
        .unwrap();
    let mut handler = RecordingHandler::new();
    sup.run(&mut handler, RunOptions::default()).unwrap();
    assert_eq!(handler.stdout, vec!["a\n", "b\n", "no-newline"]);
    assert_eq!(handler.stdout_text(), "a\nb\nno-newline");
}

#[test]
fn large_output_does_not_deadlock() {
    init_tracing();
    // Well past a pipe buffer on both streams.
    let script = "i=0; while [ $i -lt 5000 ]; do echo \"line $i\"; echo \"err $i\" >&2; i=$((i+1)); done";
    let mut sup = ProcessSupervisor::spawn(&sh(script), &quick_context()).unwrap();
    let mut handler = RecordingHandler::new();
    let outcome = sup.run(&mut handler, RunOptions::default()).unwrap();
    assert_eq!(outcome.returncode(), Some(0));
    assert_eq!(handler.stdout.len(), 5000);
    assert_eq!(handler.stderr.len(), 5000);
    assert_eq!(handler.stdout[4999], "line 4999\n");
}

#[test]
fn silence_trips_output_timeout() {
    init_tracing();
    let mut sup =
        ProcessSupervisor::spawn(&sh("echo started; exec sleep 10"), &quick_context()).unwrap();
    let mut handler = RecordingHandler::new();

    let started = Instant::now();
    let outcome = sup
        .run(
            &mut handler,
            RunOptions {
                output_timeout: Some(Duration::from_millis(500)),
                ..RunOptions::default()
            },
        )
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(outcome, RunOutcome::TimedOut(_)));
    assert_eq!(outcome.returncode(), Some(-(Signal::SIGTERM as i32)));
    assert_eq!(handler.timeouts, 1);
    assert_eq!(handler.stdout, vec!["started\n"]);
    assert_eq!(sup.state(), SupervisorState::Finished);
}

#[test]
fn steady_output_keeps_output_timeout_at_bay() {
    init_tracing();
    let script = "for i in 1 2 3 4 5 6; do echo tick; sleep 0.1; done";
    let mut sup = ProcessSupervisor::spawn(&sh(script), &quick_context()).unwrap();
    let mut handler = RecordingHandler::new();
    let outcome = sup
        .run(
            &mut handler,
            RunOptions {
                output_timeout: Some(Duration::from_millis(400)),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Exited(_)));
    assert_eq!(handler.timeouts, 0);
    assert_eq!(handler.stdout.len(), 6);
}

#[test]
fn overall_timeout_applies_despite_output() {
    init_tracing();
    let script = "while :; do echo busy; sleep 0.05; done";
    let mut sup = ProcessSupervisor::spawn(&sh(script), &quick_context()).unwrap();
    let mut handler = RecordingHandler::new();
    let started = Instant::now();
    let outcome = sup
        .run(
            &mut handler,
            RunOptions {
                timeout: Some(Duration::from_millis(400)),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert!(matches!(outcome, RunOutcome::TimedOut(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(handler.timeouts, 1);
}

#[test]
fn ignored_sigterm_escalates_to_sigkill() {
    init_tracing();
    // An ignored disposition survives exec.
    let mut sup = ProcessSupervisor::spawn(
        &sh("trap '' TERM; echo armed; exec sleep 30"),
        &quick_context(),
    )
    .unwrap();
    let mut handler = RecordingHandler::new();
    let started = Instant::now();

    let outcome = sup
        .run(
            &mut handler,
            RunOptions {
                timeout: Some(Duration::from_millis(300)),
                ..RunOptions::default()
            },
        )
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(outcome, RunOutcome::TimedOut(_)));
    assert_eq!(outcome.returncode(), Some(-(Signal::SIGKILL as i32)));
}

#[test]
fn unkillable_process_is_abandoned() {
    init_tracing();
    let signals = Arc::new(SwallowSignals::default());
    let ctx = quick_context().with_signaller(signals.clone());
    let mut sup = ProcessSupervisor::spawn(&sh("exec sleep 30"), &ctx).unwrap();
    let pid = sup.pid();

    let outcome = sup
        .run(
            &mut NullHandler,
            RunOptions {
                timeout: Some(Duration::from_millis(200)),
                ..RunOptions::default()
            },
        )
        .unwrap();

    assert_eq!(outcome, RunOutcome::Abandoned { pid });
    assert_eq!(sup.state(), SupervisorState::Abandoned);
    assert_eq!(sup.returncode(), None);
    assert_eq!(
        signals.delivered(),
        vec![(pid, ShutdownSignal::Terminate), (pid, ShutdownSignal::Kill)]
    );

    // Clean up the process the supervisor gave up on.
    let pid = Pid::from_raw(pid as i32);
    kill(pid, Signal::SIGKILL).unwrap();
    waitpid(pid, None).unwrap();
}

#[test]
fn done_handler_triggers_shutdown() {
    init_tracing();
    let mut sup = ProcessSupervisor::spawn(
        &sh("echo booting; echo READY; echo after; exec sleep 30"),
        &quick_context(),
    )
    .unwrap();
    let mut handler = RecordingHandler::done_on("READY");
    let started = Instant::now();

    let outcome = sup.run(&mut handler, RunOptions::default()).unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    // Done is not a timeout.
    assert!(matches!(outcome, RunOutcome::Exited(_)));
    assert_eq!(handler.timeouts, 0);
    assert!(handler.stdout.contains(&"READY\n".to_string()));
}

#[test]
fn stop_on_done_mutes_output_after_done() {
    init_tracing();
    // The trailing output is written only after the process has been asked
    // to stop.
    let script = "trap 'echo late; exit 0' TERM; echo READY; while :; do sleep 0.05; done";
    let mut sup = ProcessSupervisor::spawn(&sh(script), &quick_context()).unwrap();
    let mut handler = RecordingHandler::done_on("READY");

    sup.run(
        &mut handler,
        RunOptions {
            stop_on_done: true,
            ..RunOptions::default()
        },
    )
    .unwrap();

    assert_eq!(handler.stdout, vec!["READY\n"]);
}

#[test]
fn environment_and_cwd_reach_the_child() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let spec = sh("echo \"$RW_GREETING\"; pwd")
        .env("RW_GREETING", "hello")
        .cwd(dir.path());
    let mut sup = ProcessSupervisor::spawn(&spec, &quick_context()).unwrap();
    let mut handler = RecordingHandler::new();
    sup.run(&mut handler, RunOptions::default()).unwrap();

    assert_eq!(handler.stdout[0], "hello\n");
    let reported = std::path::PathBuf::from(handler.stdout[1].trim_end());
    assert_eq!(
        reported.canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[test]
fn spawn_failure_names_the_program() {
    let err = ProcessSupervisor::spawn(
        &CommandSpec::new(["/definitely/not/a/program"]),
        &quick_context(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("/definitely/not/a/program"));

    let err = ProcessSupervisor::spawn(&CommandSpec::new(Vec::<String>::new()), &quick_context())
        .unwrap_err();
    assert!(matches!(err, runwarden::errors::SupervisorError::EmptyCommand));
}

#[test]
fn limits_too_large_for_the_clock_never_fire() {
    init_tracing();
    let mut sup = ProcessSupervisor::spawn(&sh("echo hi"), &quick_context()).unwrap();
    let mut handler = RecordingHandler::new();

    let outcome = sup
        .run(
            &mut handler,
            RunOptions {
                timeout: Some(Duration::MAX),
                output_timeout: Some(Duration::MAX),
                stop_on_done: false,
            },
        )
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Exited(status) if status.success()));
    assert_eq!(handler.stdout, vec!["hi\n"]);
    assert_eq!(handler.timeouts, 0);
}

#[test]
fn huge_shutdown_wait_still_grants_the_grace_period() {
    init_tracing();
    // Exits on its own a little after SIGTERM; SIGKILL must not overtake it.
    let script = "trap 'sleep 0.3; exit 7' TERM; echo READY; while :; do sleep 0.05; done";
    let ctx = SupervisorContext::default().with_shutdown_wait(Duration::MAX);
    let mut sup = ProcessSupervisor::spawn(&sh(script), &ctx).unwrap();
    let mut handler = RecordingHandler::done_on("READY");

    let outcome = sup.run(&mut handler, RunOptions::default()).unwrap();

    assert!(matches!(outcome, RunOutcome::Exited(_)));
    assert_eq!(sup.returncode(), Some(7));
}

#[test]
fn child_does_not_inherit_ignored_sigint() {
    init_tracing();
    // SAFETY: only changes this test process's disposition; no handler runs.
    let previous = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) };
    previous.unwrap();

    let mut sup =
        ProcessSupervisor::spawn(&sh("grep '^SigIgn' /proc/self/status"), &quick_context())
            .unwrap();
    let mut handler = RecordingHandler::new();
    sup.run(&mut handler, RunOptions::default()).unwrap();

    let line = handler.stdout_text();
    let mask = u64::from_str_radix(line.trim_start_matches("SigIgn:").trim(), 16).unwrap();
    assert_eq!(mask & (1 << (Signal::SIGINT as u64 - 1)), 0, "SIGINT ignored: {line}");
}

/// Start a copy of `sh` whose process name is `name`.
fn spawn_renamed_shell(dir: &Path, name: &str, script: &str) -> Child {
    let program = dir.join(name);
    fs::copy("/bin/sh", &program).unwrap();
    let mut attempts = 0;
    loop {
        let spawned = Command::new(&program)
            .arg0("sh")
            .args(["-c", script])
            .stdout(Stdio::piped())
            .spawn();
        match spawned {
            Ok(child) => return child,
            // Another test thread may still hold the fresh copy open for
            // writing across its fork.
            Err(err) if err.raw_os_error() == Some(26) && attempts < 50 => {
                attempts += 1;
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => panic!("failed to start {name}: {err}"),
        }
    }
}

#[test]
fn wrapper_aware_signals_reach_the_wrapped_child() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut wrapper = spawn_renamed_shell(dir.path(), "rw-wrapper", "sleep 30 & echo $!; wait");
    let mut line = String::new();
    BufReader::new(wrapper.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    let workload: u32 = line.trim().parse().unwrap();

    WrapperAware::new(["rw-wrapper"])
        .deliver(wrapper.id(), ShutdownSignal::Terminate)
        .unwrap();

    let gone = wait_until_gone(workload, SOON);
    if !gone {
        let _ = kill(Pid::from_raw(workload as i32), Signal::SIGKILL);
    }
    let _ = wrapper.kill();
    wrapper.wait().unwrap();
    assert!(gone, "wrapped workload {workload} survived SIGTERM");
}

#[test]
fn unknown_process_names_are_signalled_directly() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut plain = spawn_renamed_shell(dir.path(), "rw-plain", "sleep 30 & echo $!; wait");
    let mut line = String::new();
    BufReader::new(plain.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    let workload: u32 = line.trim().parse().unwrap();

    WrapperAware::new(["rw-wrapper"])
        .deliver(plain.id(), ShutdownSignal::Terminate)
        .unwrap();
    plain.wait().unwrap();

    // Only the shell itself was asked to stop.
    assert!(process_alive(workload));
    kill(Pid::from_raw(workload as i32), Signal::SIGKILL).unwrap();
    assert!(wait_until_gone(workload, SOON));
}
