//! Service definitions, the ordered service registry and run records.
//!
//! A [`ServiceTask`] is a named body run against [`SharedState`] on every
//! tick (`repeat = true`) or exactly once (`repeat = false`). Names are not
//! required to be unique; duplicates are independent services.

use crate::error::{Result, SeekrError};
use crate::state::SharedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Body of a scheduled service.
pub type ServiceFn = Arc<dyn Fn(&SharedState) -> Result<()> + Send + Sync>;

/// A named unit of work with a repeat policy.
pub struct ServiceTask {
    name: String,
    body: ServiceFn,
    repeat: bool,
    consumed: bool,
}

impl ServiceTask {
    /// Create a service from a name, a body and a repeat flag.
    pub fn new<F>(name: impl Into<String>, body: F, repeat: bool) -> Self
    where
        F: Fn(&SharedState) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
            repeat,
            consumed: false,
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the service runs on every tick.
    pub fn repeats(&self) -> bool {
        self.repeat
    }

    /// Whether a run-once service has already been handed out.
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    fn is_due(&self) -> bool {
        self.repeat || !self.consumed
    }
}

impl std::fmt::Debug for ServiceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTask")
            .field("name", &self.name)
            .field("repeat", &self.repeat)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

/// A service selected for execution on a particular tick.
#[derive(Clone)]
pub struct DueTask {
    /// Service name.
    pub name: String,
    body: ServiceFn,
}

impl DueTask {
    /// Invoke the service body.
    pub fn run(&self, state: &SharedState) -> Result<()> {
        (self.body)(state)
    }
}

impl std::fmt::Debug for DueTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DueTask").field("name", &self.name).finish()
    }
}

/// Introspection view of a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// Whether the service runs on every tick.
    pub repeat: bool,
    /// Whether a run-once service has already run.
    pub consumed: bool,
}

/// Ordered collection of services.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    tasks: Vec<ServiceTask>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a service. Duplicate names are kept as separate services.
    pub fn register<F>(&mut self, name: impl Into<String>, body: F, repeat: bool)
    where
        F: Fn(&SharedState) -> Result<()> + Send + Sync + 'static,
    {
        self.push(ServiceTask::new(name, body, repeat));
    }

    /// Append an already-built service.
    pub fn push(&mut self, task: ServiceTask) {
        self.tasks.push(task);
    }

    /// Services due on `tick`, in registration order.
    ///
    /// Run-once services are marked consumed as they are handed out, so they
    /// are never returned again whatever the outcome of their run.
    pub fn list_due(&mut self, tick: u64) -> Vec<DueTask> {
        let due: Vec<DueTask> = self
            .tasks
            .iter_mut()
            .filter(|task| task.is_due())
            .map(|task| {
                if !task.repeat {
                    task.consumed = true;
                }
                DueTask {
                    name: task.name.clone(),
                    body: Arc::clone(&task.body),
                }
            })
            .collect();
        tracing::trace!(tick, due = due.len(), "listed due services");
        due
    }

    /// Registered services, in registration order.
    pub fn tasks(&self) -> &[ServiceTask] {
        &self.tasks
    }

    /// Introspection snapshot of every service.
    pub fn infos(&self) -> Vec<ServiceInfo> {
        self.tasks
            .iter()
            .map(|task| ServiceInfo {
                name: task.name.clone(),
                repeat: task.repeat,
                consumed: task.consumed,
            })
            .collect()
    }

    /// Service names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Cloneable handle onto the registry owned by a running scheduler.
///
/// Services registered through the handle while a tick is running are
/// picked up from the next tick on.
#[derive(Debug, Clone)]
pub struct ServiceRegistrar {
    inner: Arc<Mutex<ServiceRegistry>>,
}

impl ServiceRegistrar {
    pub(crate) fn new(inner: Arc<Mutex<ServiceRegistry>>) -> Self {
        Self { inner }
    }

    /// Append a service to the live registry.
    pub fn register<F>(&self, name: impl Into<String>, body: F, repeat: bool) -> Result<()>
    where
        F: Fn(&SharedState) -> Result<()> + Send + Sync + 'static,
    {
        let mut registry = self
            .inner
            .lock()
            .map_err(|_| SeekrError::State("service registry lock poisoned".to_owned()))?;
        registry.register(name, body, repeat);
        Ok(())
    }

    /// Introspection snapshot of the live registry.
    pub fn infos(&self) -> Result<Vec<ServiceInfo>> {
        let registry = self
            .inner
            .lock()
            .map_err(|_| SeekrError::State("service registry lock poisoned".to_owned()))?;
        Ok(registry.infos())
    }
}

/// Outcome of one service run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The body returned `Ok`.
    Success,
    /// The body returned an error or panicked.
    Failed(String),
}

/// One entry of scheduler run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunRecord {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Service name.
    pub task: String,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock finish.
    pub finished_at: DateTime<Utc>,
    /// Result of the run.
    pub outcome: TaskOutcome,
}

impl TaskRunRecord {
    /// Whether the run failed.
    pub fn failed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }
}

// ---------------------------------------------------------------------------
// Built-in services
// ---------------------------------------------------------------------------

/// Name of the built-in database persistence service.
pub const SERVICE_SAVE_DATABASE: &str = "save-database";

/// Register the services every seekr process runs.
pub fn register_builtin_services(registry: &mut ServiceRegistry) {
    registry.register(SERVICE_SAVE_DATABASE, save_database, true);
}

/// Persist the database to the configured data file.
///
/// The database is cloned under the read lock and written after the lock is
/// released, so slow disks do not block API writers.
pub fn save_database(state: &SharedState) -> Result<()> {
    let path = state.read_settings(|s| s.general.data_file.clone())?;
    let snapshot = state.database_snapshot()?;
    snapshot
        .save(&path)
        .map_err(|e| SeekrError::task(SERVICE_SAVE_DATABASE, e))
}
