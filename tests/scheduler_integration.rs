//! Integration tests for seekrd: run-once semantics, tick accounting,
//! non-overlapping ticks and shutdown drain.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use seekr::scheduler::{Scheduler, ServiceRegistry, TaskOutcome};
use seekr::{DataBase, Person, SeekrConfig, SeekrError, SharedState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn shared() -> Arc<SharedState> {
    Arc::new(SharedState::new(SeekrConfig::default(), DataBase::new()))
}

#[tokio::test(start_paused = true)]
async fn run_once_service_runs_once_across_many_ticks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut registry = ServiceRegistry::new();
    registry.register(
        "once-and-failing",
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SeekrError::task("once-and-failing", "always fails"))
        },
        false,
    );

    let scheduler = Scheduler::new(shared(), registry, Duration::from_secs(2));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run_until_cancelled(cancel.clone()));

    tokio::time::sleep(Duration::from_secs(21)).await;
    cancel.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(summary.ticks, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.failures, 1);
}

#[tokio::test(start_paused = true)]
async fn counter_scenario_reaches_five_after_five_intervals() {
    let counter = Arc::new(AtomicUsize::new(0));
    let bump = Arc::clone(&counter);
    let mut registry = ServiceRegistry::new();
    registry.register(
        "increment",
        move |_| {
            bump.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        true,
    );

    let scheduler = Scheduler::new(shared(), registry, Duration::from_secs(1));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run_until_cancelled(cancel.clone()));

    tokio::time::sleep(Duration::from_secs(5)).await;
    tokio::task::yield_now().await;
    cancel.cancel();
    handle.await.unwrap();

    let count = counter.load(Ordering::SeqCst);
    assert!((4..=6).contains(&count), "counter was {count}");
}

#[tokio::test]
async fn overrunning_ticks_never_overlap() {
    let spans: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&spans);
    let mut registry = ServiceRegistry::new();
    registry.register(
        "slow",
        move |_| {
            let start = Instant::now();
            std::thread::sleep(Duration::from_millis(40));
            recorder.lock().unwrap().push((start, Instant::now()));
            Ok(())
        },
        true,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(shared(), registry, Duration::from_millis(10))
        .with_result_channel(tx);
    let handle = scheduler.start().unwrap();

    let mut ticks = Vec::new();
    while ticks.len() < 5 {
        let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("record within timeout")
            .expect("channel open");
        ticks.push(record.tick);
    }
    handle.shutdown().await.unwrap();

    assert!(
        ticks.windows(2).all(|w| w[1] == w[0] + 1),
        "ticks not consecutive: {ticks:?}"
    );

    let spans = spans.lock().unwrap();
    for pair in spans.windows(2) {
        let (_, prev_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(next_start >= prev_end, "tick started before previous finished");
    }
}

#[tokio::test]
async fn shutdown_drains_in_flight_tick() {
    let finished = Arc::new(AtomicUsize::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let done = Arc::clone(&finished);
    let mut registry = ServiceRegistry::new();
    registry.register(
        "long",
        move |_| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(200));
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        false,
    );

    let handle = Scheduler::new(shared(), registry, Duration::from_millis(10))
        .start()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
        .await
        .expect("service started")
        .expect("channel open");
    let summary = handle.shutdown().await.unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(summary.runs >= 1);
}

#[tokio::test]
async fn service_write_is_visible_to_concurrent_reader() {
    let state = shared();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = ServiceRegistry::new();
    registry.register(
        "insert-1",
        |state| {
            state.write_db(|db| {
                db.insert(Person::new("1", "hacker supa hack hack hack"));
            })
        },
        false,
    );

    let handle = Scheduler::new(Arc::clone(&state), registry, Duration::from_millis(10))
        .with_result_channel(tx)
        .start()
        .unwrap();

    let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("record within timeout")
        .expect("channel open");
    assert_eq!(record.outcome, TaskOutcome::Success);

    // The record is published after the write lock was released.
    let name = state
        .read_db(|db| db.get("1").map(|p| p.name.clone()))
        .unwrap();
    assert_eq!(name.as_deref(), Some("hacker supa hack hack hack"));

    handle.shutdown().await.unwrap();
}
