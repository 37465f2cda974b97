//! Startup wiring: database, built-in services, extensions, scheduler.
//!
//! Call [`prepare`] once per process. It produces the single
//! [`SharedState`] and a scheduler that has not been started yet.

use crate::config::SeekrConfig;
use crate::database::DataBase;
use crate::error::Result;
use crate::extensions::ExtensionCatalog;
use crate::scheduler::tasks::{register_builtin_services, save_database};
use crate::scheduler::{Scheduler, TickReport};
use crate::state::{ApiConfig, SharedState};
use std::sync::Arc;
use tracing::info;

/// Shared state and the not-yet-started scheduler.
pub struct Prepared {
    /// The process-wide shared state.
    pub state: Arc<SharedState>,
    /// Scheduler over the built-in and extension-supplied services.
    pub scheduler: Scheduler,
}

/// Load the database, apply extensions and build the scheduler.
///
/// # Errors
///
/// Fails when the database file is unreadable, when any named extension
/// fails, or when the extensions leave the settings invalid.
pub fn prepare(
    settings: SeekrConfig,
    extensions: &[String],
    catalog: &ExtensionCatalog,
) -> Result<Prepared> {
    let database = DataBase::load(&settings.general.data_file)?;
    info!(
        records = database.len(),
        path = %settings.general.data_file.display(),
        "database loaded"
    );

    let mut config = ApiConfig::new(settings).with_database(database);
    register_builtin_services(&mut config.services);

    let config = catalog.open(extensions, config)?;
    config.settings.validate()?;

    let interval = config.settings.seekrd.interval();
    let (state, services) = config.into_shared();
    info!(services = services.len(), "services registered");

    let scheduler = Scheduler::new(Arc::clone(&state), services, interval);
    Ok(Prepared { state, scheduler })
}

impl Prepared {
    /// Run a single tick, then write the database to disk.
    ///
    /// `save-database` runs first within a tick, so the explicit save here is
    /// what persists changes made by the services after it.
    pub fn run_once(&mut self) -> Result<TickReport> {
        let report = self.scheduler.tick_once();
        save_database(&self.state)?;
        Ok(report)
    }
}
