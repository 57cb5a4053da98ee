// tests/thread_pool.rs

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{SOON, init_tracing};
use runwarden::errors::{ExecutorError, FutureError, TaskError};
use runwarden::executor::{Executor, ThreadPoolExecutor};
use runwarden::future::{FutureState, ReturnWhen, wait};

#[test]
fn zero_workers_is_rejected() {
    let err = ThreadPoolExecutor::<()>::new(0).err().expect("should fail");
    assert!(matches!(err, ExecutorError::NoWorkers));
}

#[test]
fn runs_tasks_concurrently_up_to_max_workers() {
    init_tracing();
    let pool = ThreadPoolExecutor::new(3).unwrap();
    // Every task blocks until all three are running at once.
    let barrier = Arc::new(Barrier::new(3));

    let futures: Vec<_> = (0..3)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            pool.submit_fn(move || {
                barrier.wait();
                Ok(i * 10)
            })
            .unwrap()
        })
        .collect();

    let results: Vec<i32> = futures.iter().map(|f| f.result(Some(SOON)).unwrap()).collect();
    assert_eq!(results, vec![0, 10, 20]);
}

#[test]
fn errors_and_panics_stay_inside_futures() {
    init_tracing();
    let pool = ThreadPoolExecutor::<u32>::new(1).unwrap();

    let failing = pool.submit_fn(|| anyhow::bail!("disk full")).unwrap();
    let panicking = pool.submit_fn(|| panic!("worker exploded")).unwrap();
    // The single worker must survive both and still run this one.
    let fine = pool.submit_fn(|| Ok(7)).unwrap();

    match failing.result(Some(SOON)) {
        Err(FutureError::Failed(TaskError::Raised(err))) => {
            assert_eq!(err.to_string(), "disk full")
        }
        other => panic!("unexpected: {other:?}"),
    }
    match panicking.result(Some(SOON)) {
        Err(FutureError::Failed(TaskError::Panicked(msg))) => assert_eq!(msg, "worker exploded"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(fine.result(Some(SOON)).unwrap(), 7);
}

#[test]
fn single_worker_starts_the_next_task_only_after_the_first() {
    init_tracing();
    let pool = ThreadPoolExecutor::new(1).unwrap();

    let first_gate = Arc::new(Barrier::new(2));
    let first = {
        let gate = Arc::clone(&first_gate);
        pool.submit_fn(move || {
            gate.wait();
            Ok(1)
        })
        .unwrap()
    };
    let second_gate = Arc::new(Barrier::new(2));
    let second = {
        let gate = Arc::clone(&second_gate);
        pool.submit_fn(move || {
            gate.wait();
            Ok(2)
        })
        .unwrap()
    };

    let deadline = Instant::now() + SOON;
    while !first.running() {
        assert!(Instant::now() < deadline, "first task never started");
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(100));
    assert!(!second.running(), "second task started while the only worker was busy");
    assert_eq!(second.state(), FutureState::Pending);

    first_gate.wait();
    assert_eq!(first.result(Some(SOON)).unwrap(), 1);

    // The second task is now parked on its own gate.
    while !second.running() {
        assert!(Instant::now() < deadline, "second task never started");
        thread::sleep(Duration::from_millis(5));
    }
    second_gate.wait();
    assert_eq!(second.result(Some(SOON)).unwrap(), 2);
    pool.shutdown(true);
}

#[test]
fn queued_task_can_be_cancelled() {
    init_tracing();
    let pool = ThreadPoolExecutor::new(1).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let gate = Arc::new(Barrier::new(2));
    let blocker = {
        let gate = Arc::clone(&gate);
        pool.submit_fn(move || {
            gate.wait();
            Ok(())
        })
        .unwrap()
    };
    let queued = {
        let ran = Arc::clone(&ran);
        pool.submit_fn(move || {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap()
    };

    assert!(queued.cancel());
    gate.wait();
    blocker.result(Some(SOON)).unwrap();
    pool.shutdown(true);

    assert_eq!(queued.state(), FutureState::Cancelled);
    assert!(matches!(queued.result(None), Err(FutureError::Cancelled)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn shutdown_drains_queue_then_rejects() {
    init_tracing();
    let pool = ThreadPoolExecutor::new(2).unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let futures: Vec<_> = (0..8)
        .map(|_| {
            let count = Arc::clone(&count);
            pool.submit_fn(move || {
                thread::sleep(Duration::from_millis(10));
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
        })
        .collect();

    pool.shutdown(true);
    assert_eq!(count.load(Ordering::SeqCst), 8);
    assert!(futures.iter().all(|f| f.done()));

    let err = pool.submit_fn(|| Ok(())).err().expect("submit after shutdown");
    assert!(matches!(err, ExecutorError::Shutdown));
}

#[test]
fn wait_first_completed_returns_early() {
    init_tracing();
    let pool = ThreadPoolExecutor::new(2).unwrap();
    let quick = pool.submit_fn(|| Ok("quick")).unwrap();
    let slow = pool
        .submit_fn(|| {
            thread::sleep(Duration::from_millis(500));
            Ok("slow")
        })
        .unwrap();

    let started = Instant::now();
    let outcome = wait(&[quick.clone(), slow.clone()], Some(SOON), ReturnWhen::FirstCompleted);
    assert!(started.elapsed() < Duration::from_millis(450));
    assert_eq!(outcome.done.len(), 1);
    assert!(outcome.done[0].same_as(&quick));
    assert_eq!(outcome.not_done.len(), 1);

    let outcome = wait(&[quick, slow], None, ReturnWhen::AllCompleted);
    assert_eq!(outcome.done.len(), 2);
    assert!(outcome.not_done.is_empty());
}

#[test]
fn wait_first_exception_stops_at_failure() {
    init_tracing();
    let pool = ThreadPoolExecutor::<()>::new(2).unwrap();
    let failing = pool.submit_fn(|| anyhow::bail!("nope")).unwrap();
    let slow = pool
        .submit_fn(|| {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap();

    let outcome = wait(&[failing, slow], Some(SOON), ReturnWhen::FirstException);
    assert_eq!(outcome.done.len(), 1);
    assert!(outcome.done[0].exception(None).unwrap().is_some());
    assert_eq!(outcome.not_done.len(), 1);
}

#[test]
fn drop_waits_for_running_tasks() {
    init_tracing();
    let finished = Arc::new(AtomicUsize::new(0));
    {
        let pool = ThreadPoolExecutor::new(1).unwrap();
        let finished = Arc::clone(&finished);
        pool.submit_fn(move || {
            thread::sleep(Duration::from_millis(100));
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}
