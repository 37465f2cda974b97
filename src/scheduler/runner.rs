//! Scheduler background loop (seekrd).
//!
//! Ticks at every multiple of the configured interval since start and runs
//! the due services one after another. The loop lives on its own OS thread
//! with a current-thread tokio runtime, apart from the API server runtime.
//!
//! Ticks never overlap: a tick that overruns the interval delays the next
//! one, and the missed ticks are caught up back to back instead of dropped.
//! Cancellation is only observed between ticks, so shutdown always lets the
//! in-flight tick finish.

use crate::error::{Result, SeekrError};
use crate::scheduler::tasks::{
    DueTask, ServiceRegistrar, ServiceRegistry, TaskOutcome, TaskRunRecord,
};
use crate::state::SharedState;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Number of run-history entries to keep.
const DEFAULT_HISTORY_LIMIT: usize = 400;

/// Smallest accepted tick interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Totals reported when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    /// Completed ticks.
    pub ticks: u64,
    /// Service runs across all ticks.
    pub runs: u64,
    /// Failed service runs.
    pub failures: u64,
}

/// Result of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Services that ran, in order.
    pub ran: Vec<String>,
    /// Services that failed.
    pub failed: Vec<String>,
}

/// Fixed-interval service runner.
pub struct Scheduler {
    state: Arc<SharedState>,
    registry: Arc<Mutex<ServiceRegistry>>,
    interval: Duration,
    history: Vec<TaskRunRecord>,
    max_history_entries: usize,
    result_tx: Option<mpsc::UnboundedSender<TaskRunRecord>>,
    summary: SchedulerSummary,
}

impl Scheduler {
    /// Create a scheduler over `services` that ticks every `interval`.
    pub fn new(state: Arc<SharedState>, services: ServiceRegistry, interval: Duration) -> Self {
        Self {
            state,
            registry: Arc::new(Mutex::new(services)),
            interval: interval.max(MIN_INTERVAL),
            history: Vec::new(),
            max_history_entries: DEFAULT_HISTORY_LIMIT,
            result_tx: None,
            summary: SchedulerSummary::default(),
        }
    }

    /// Publish every run record on `tx`.
    pub fn with_result_channel(mut self, tx: mpsc::UnboundedSender<TaskRunRecord>) -> Self {
        self.result_tx = Some(tx);
        self
    }

    /// Override the in-memory run-history limit.
    pub fn with_history_limit(mut self, max_entries: usize) -> Self {
        self.max_history_entries = max_entries.max(1);
        self
    }

    /// Handle for registering services into this scheduler's registry.
    pub fn registrar(&self) -> ServiceRegistrar {
        ServiceRegistrar::new(Arc::clone(&self.registry))
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Recent run history, oldest first.
    pub fn history(&self) -> &[TaskRunRecord] {
        &self.history
    }

    /// Totals so far.
    pub fn summary(&self) -> SchedulerSummary {
        self.summary
    }

    /// Run one tick now: list the due services and run each in order.
    ///
    /// Services registered while this tick runs are not part of it.
    pub fn tick_once(&mut self) -> TickReport {
        let tick = self.summary.ticks + 1;
        let due = match self.registry.lock() {
            Ok(mut registry) => registry.list_due(tick),
            Err(_) => {
                error!(tick, "service registry lock poisoned, skipping tick");
                return TickReport {
                    tick,
                    ..TickReport::default()
                };
            }
        };

        debug!(tick, services = due.len(), "seekrd tick");
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        for task in due {
            let record = self.run_task(tick, &task);
            self.summary.runs += 1;
            report.ran.push(task.name.clone());
            if record.failed() {
                self.summary.failures += 1;
                report.failed.push(task.name.clone());
            }
            self.push_history(record.clone());
            if let Some(tx) = &self.result_tx {
                if tx.send(record).is_err() {
                    debug!("scheduler result channel closed, dropping further records");
                    self.result_tx = None;
                }
            }
        }

        self.summary.ticks = tick;
        report
    }

    fn run_task(&self, tick: u64, task: &DueTask) -> TaskRunRecord {
        let started_at = chrono::Utc::now();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| task.run(&self.state)));
        let finished_at = chrono::Utc::now();

        let outcome = match result {
            Ok(Ok(())) => TaskOutcome::Success,
            Ok(Err(e)) => {
                warn!(tick, service = %task.name, error = %e, "service failed");
                TaskOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(tick, service = %task.name, "service panicked: {reason}");
                TaskOutcome::Failed(format!("panicked: {reason}"))
            }
        };

        TaskRunRecord {
            tick,
            task: task.name.clone(),
            started_at,
            finished_at,
            outcome,
        }
    }

    fn push_history(&mut self, run: TaskRunRecord) {
        self.history.push(run);
        if self.history.len() > self.max_history_entries {
            let drop_count = self.history.len() - self.max_history_entries;
            self.history.drain(0..drop_count);
        }
    }

    /// Drive the tick loop on the current runtime until `cancel` fires.
    ///
    /// The first tick fires one interval after the call.
    pub async fn run_until_cancelled(mut self, cancel: CancellationToken) -> SchedulerSummary {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!(
            interval_secs = self.interval.as_secs_f64(),
            "seekrd started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick_once();
                }
            }
        }

        info!(
            ticks = self.summary.ticks,
            runs = self.summary.runs,
            failures = self.summary.failures,
            "seekrd stopped"
        );
        self.summary
    }

    /// Start the tick loop on a dedicated `seekrd` thread.
    pub fn start(self) -> Result<SchedulerHandle> {
        let cancel = CancellationToken::new();
        let registrar = self.registrar();
        let (done_tx, done_rx) = oneshot::channel();
        let loop_cancel = cancel.clone();

        std::thread::Builder::new()
            .name("seekrd".to_owned())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build();
                match runtime {
                    Ok(rt) => {
                        let summary = rt.block_on(self.run_until_cancelled(loop_cancel));
                        let _ = done_tx.send(summary);
                    }
                    Err(e) => error!("failed to create seekrd runtime: {e}"),
                }
            })
            .map_err(|e| SeekrError::State(format!("cannot spawn seekrd thread: {e}")))?;

        Ok(SchedulerHandle {
            cancel,
            registrar,
            done_rx,
        })
    }
}

/// Handle to a scheduler running on its own thread.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    registrar: ServiceRegistrar,
    done_rx: oneshot::Receiver<SchedulerSummary>,
}

impl SchedulerHandle {
    /// Registrar for the running scheduler's registry.
    pub fn registrar(&self) -> ServiceRegistrar {
        self.registrar.clone()
    }

    /// Token that stops the loop at the next tick boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and wait for the in-flight tick to drain.
    pub async fn shutdown(self) -> Result<SchedulerSummary> {
        self.cancel.cancel();
        self.done_rx
            .await
            .map_err(|_| SeekrError::State("seekrd thread exited without a summary".to_owned()))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::SeekrConfig;
    use crate::database::{DataBase, Person};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shared() -> Arc<SharedState> {
        Arc::new(SharedState::new(SeekrConfig::default(), DataBase::new()))
    }

    fn counter_service(registry: &mut ServiceRegistry, name: &str, repeat: bool) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            name,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            repeat,
        );
        calls
    }

    #[test]
    fn tick_runs_services_in_registration_order() {
        let mut registry = ServiceRegistry::new();
        registry.register("first", |_| Ok(()), true);
        registry.register("second", |_| Ok(()), false);
        let mut scheduler = Scheduler::new(shared(), registry, Duration::from_secs(1));

        let report = scheduler.tick_once();
        assert_eq!(report.tick, 1);
        assert_eq!(report.ran, vec!["first", "second"]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn failing_run_once_service_is_not_retried() {
        let mut registry = ServiceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            "flaky",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SeekrError::task("flaky", "boom"))
            },
            false,
        );
        let mut scheduler = Scheduler::new(shared(), registry, Duration::from_secs(1));

        for _ in 0..5 {
            scheduler.tick_once();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.summary().failures, 1);
        assert_eq!(scheduler.summary().ticks, 5);
    }

    #[test]
    fn failure_does_not_stop_remaining_services() {
        let mut registry = ServiceRegistry::new();
        registry.register("bad", |_| Err(SeekrError::task("bad", "nope")), true);
        let after = counter_service(&mut registry, "after", true);
        let mut scheduler = Scheduler::new(shared(), registry, Duration::from_secs(1));

        let report = scheduler.tick_once();
        assert_eq!(report.failed, vec!["bad"]);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(matches!(
            scheduler.history()[0].outcome,
            TaskOutcome::Failed(ref msg) if msg.contains("nope")
        ));
    }

    #[test]
    fn panicking_service_is_recorded_as_failure() {
        let mut registry = ServiceRegistry::new();
        registry.register("panics", |_| panic!("kaboom"), true);
        let after = counter_service(&mut registry, "after", true);
        let mut scheduler = Scheduler::new(shared(), registry, Duration::from_secs(1));

        let report = scheduler.tick_once();
        assert_eq!(report.failed, vec!["panics"]);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(matches!(
            scheduler.history()[0].outcome,
            TaskOutcome::Failed(ref msg) if msg.contains("kaboom")
        ));
    }

    #[test]
    fn panic_inside_write_lock_does_not_break_later_access() {
        let state = shared();
        let mut registry = ServiceRegistry::new();
        registry.register(
            "panics-in-write",
            |state| {
                state.write_db::<()>(|db| {
                    db.insert(Person::new("half", "written before panic"));
                    panic!("boom")
                })
            },
            false,
        );
        registry.register("reader", |state| state.read_db(|db| db.len()).map(drop), true);
        let mut scheduler = Scheduler::new(Arc::clone(&state), registry, Duration::from_secs(1));

        let first = scheduler.tick_once();
        assert_eq!(first.failed, vec!["panics-in-write"]);
        let second = scheduler.tick_once();
        assert!(second.failed.is_empty(), "failed: {:?}", second.failed);

        assert!(state.read_db(|db| db.contains("half")).unwrap());
        state
            .write_db(|db| db.insert(Person::new("2", "after recovery")))
            .unwrap();
        assert_eq!(state.database_snapshot().unwrap().len(), 2);
    }

    #[test]
    fn service_mutation_is_visible_after_tick() {
        let state = shared();
        let mut registry = ServiceRegistry::new();
        registry.register(
            "insert",
            |state| {
                state.write_db(|db| {
                    db.insert(Person::new("1", "hacker supa hack hack hack"));
                })
            },
            false,
        );
        let mut scheduler = Scheduler::new(Arc::clone(&state), registry, Duration::from_secs(1));

        scheduler.tick_once();
        assert!(state.read_db(|db| db.contains("1")).unwrap());
    }

    #[test]
    fn services_registered_mid_tick_start_next_tick() {
        let mut registry = ServiceRegistry::new();
        let late_calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ServiceRegistrar>>> = Arc::new(Mutex::new(None));

        let registrar_slot = Arc::clone(&slot);
        let late_counter = Arc::clone(&late_calls);
        registry.register(
            "installer",
            move |_| {
                let guard = registrar_slot.lock().unwrap();
                let registrar = guard.as_ref().expect("registrar installed");
                let counter = Arc::clone(&late_counter);
                registrar.register(
                    "late",
                    move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                    true,
                )
            },
            false,
        );

        let mut scheduler = Scheduler::new(shared(), registry, Duration::from_secs(1));
        *slot.lock().unwrap() = Some(scheduler.registrar());

        let first = scheduler.tick_once();
        assert_eq!(first.ran, vec!["installer"]);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        let second = scheduler.tick_once();
        assert_eq!(second.ran, vec!["late"]);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_history_is_bounded() {
        let mut registry = ServiceRegistry::new();
        registry.register("a", |_| Ok(()), true);
        registry.register("b", |_| Ok(()), true);
        registry.register("c", |_| Ok(()), true);
        let mut scheduler =
            Scheduler::new(shared(), registry, Duration::from_secs(1)).with_history_limit(2);

        scheduler.tick_once();

        assert_eq!(scheduler.history().len(), 2);
        assert_eq!(scheduler.history()[0].task, "b");
        assert_eq!(scheduler.history()[1].task, "c");
    }

    #[test]
    fn records_are_published_on_result_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = ServiceRegistry::new();
        registry.register("published", |_| Ok(()), true);
        let mut scheduler =
            Scheduler::new(shared(), registry, Duration::from_secs(1)).with_result_channel(tx);

        scheduler.tick_once();

        let record = rx.try_recv().expect("record available");
        assert_eq!(record.task, "published");
        assert_eq!(record.tick, 1);
        assert_eq!(record.outcome, TaskOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_count_matches_elapsed_intervals() {
        let mut registry = ServiceRegistry::new();
        let calls = counter_service(&mut registry, "counter", true);
        let scheduler = Scheduler::new(shared(), registry, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run_until_cancelled(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        cancel.cancel();
        let summary = handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.runs, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_before_first_interval() {
        let mut registry = ServiceRegistry::new();
        let calls = counter_service(&mut registry, "counter", true);
        let scheduler = Scheduler::new(shared(), registry, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run_until_cancelled(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(29)).await;
        cancel.cancel();
        let summary = handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.ticks, 0);
    }

    #[tokio::test]
    async fn start_runs_on_dedicated_thread_and_shuts_down() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = ServiceRegistry::new();
        registry.register(
            "thread-name",
            |_| {
                let name = std::thread::current().name().map(str::to_owned);
                if name.as_deref() == Some("seekrd") {
                    Ok(())
                } else {
                    Err(SeekrError::task("thread-name", format!("ran on {name:?}")))
                }
            },
            true,
        );
        let scheduler = Scheduler::new(shared(), registry, Duration::from_millis(10))
            .with_result_channel(tx);

        let handle = scheduler.start().unwrap();
        let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("tick within timeout")
            .expect("record");
        assert_eq!(record.outcome, TaskOutcome::Success);

        let summary = tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown within timeout")
            .unwrap();
        assert!(summary.ticks >= 1);
    }
}
