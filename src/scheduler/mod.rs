//! Background service scheduler (seekrd).
//!
//! Runs registered services against the shared state on a fixed interval.
//! Extensions and built-ins add services through [`ServiceRegistry`] before
//! start, or through a [`ServiceRegistrar`] once the scheduler is running.

pub mod runner;
pub mod tasks;

pub use runner::{Scheduler, SchedulerHandle, SchedulerSummary, TickReport};
pub use tasks::{
    ServiceInfo, ServiceRegistrar, ServiceRegistry, ServiceTask, TaskOutcome, TaskRunRecord,
};
