//! Working configuration and the process-wide shared state.
//!
//! [`ApiConfig`] is the plain, owned value that extensions receive and return
//! before serving starts. [`ApiConfig::into_shared`] turns it into the single
//! [`SharedState`] instance handed to both the scheduler and the API server.
//!
//! # Locking
//!
//! `SharedState` guards each logical sub-resource with its own `RwLock`:
//! one for the settings, one for the database. A mutation becomes visible
//! to every reader at the moment its write guard is released.
//!
//! Every acquisition first tries the lock without blocking. When that fails
//! the contention counter for the sub-resource is bumped before blocking, so
//! scheduler/request overlap is observable through [`SharedState::contention`].
//!
//! A lock poisoned by a panicking holder is recovered on the next access and
//! keeps serving the data as the panicking holder left it.

use crate::config::SeekrConfig;
use crate::database::DataBase;
use crate::error::Result;
use crate::scheduler::tasks::ServiceRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// Pre-serving configuration: settings, database and the service list.
#[derive(Debug, Default)]
pub struct ApiConfig {
    /// Server, file and daemon settings.
    pub settings: SeekrConfig,
    /// Database loaded at startup.
    pub database: DataBase,
    /// Services the scheduler will run.
    pub services: ServiceRegistry,
}

impl ApiConfig {
    /// Working config with an empty database and no services.
    pub fn new(settings: SeekrConfig) -> Self {
        Self {
            settings,
            database: DataBase::new(),
            services: ServiceRegistry::new(),
        }
    }

    /// Replace the database.
    pub fn with_database(mut self, database: DataBase) -> Self {
        self.database = database;
        self
    }

    /// Replace the service registry.
    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    /// Freeze the working config into the shared state plus the service list.
    pub fn into_shared(self) -> (Arc<SharedState>, ServiceRegistry) {
        let state = Arc::new(SharedState::new(self.settings, self.database));
        (state, self.services)
    }
}

/// Number of contended lock acquisitions per sub-resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contention {
    /// Contended acquisitions of the settings lock.
    pub settings: u64,
    /// Contended acquisitions of the database lock.
    pub database: u64,
}

/// The single mutable configuration-plus-database object of the process.
#[derive(Debug)]
pub struct SharedState {
    settings: RwLock<SeekrConfig>,
    database: RwLock<DataBase>,
    settings_contention: AtomicU64,
    database_contention: AtomicU64,
}

impl SharedState {
    /// Build shared state from settings and an initial database.
    pub fn new(settings: SeekrConfig, database: DataBase) -> Self {
        Self {
            settings: RwLock::new(settings),
            database: RwLock::new(database),
            settings_contention: AtomicU64::new(0),
            database_contention: AtomicU64::new(0),
        }
    }

    /// Run `f` with shared access to the database.
    pub fn read_db<R>(&self, f: impl FnOnce(&DataBase) -> R) -> Result<R> {
        let guard = acquire_read(&self.database, &self.database_contention, "database");
        Ok(f(&guard))
    }

    /// Run `f` with exclusive access to the database.
    ///
    /// The mutation is visible to all readers once this call returns.
    pub fn write_db<R>(&self, f: impl FnOnce(&mut DataBase) -> R) -> Result<R> {
        let mut guard = acquire_write(&self.database, &self.database_contention, "database");
        Ok(f(&mut guard))
    }

    /// Clone of the current database.
    pub fn database_snapshot(&self) -> Result<DataBase> {
        self.read_db(DataBase::clone)
    }

    /// Run `f` with shared access to the settings.
    pub fn read_settings<R>(&self, f: impl FnOnce(&SeekrConfig) -> R) -> Result<R> {
        let guard = acquire_read(&self.settings, &self.settings_contention, "settings");
        Ok(f(&guard))
    }

    /// Run `f` with exclusive access to the settings.
    pub fn write_settings<R>(&self, f: impl FnOnce(&mut SeekrConfig) -> R) -> Result<R> {
        let mut guard = acquire_write(&self.settings, &self.settings_contention, "settings");
        Ok(f(&mut guard))
    }

    /// Clone of the current settings.
    pub fn settings_snapshot(&self) -> Result<SeekrConfig> {
        self.read_settings(SeekrConfig::clone)
    }

    /// Contended acquisitions observed so far.
    pub fn contention(&self) -> Contention {
        Contention {
            settings: self.settings_contention.load(Ordering::Relaxed),
            database: self.database_contention.load(Ordering::Relaxed),
        }
    }
}

/// Take the guard out of a poisoned lock and clear the flag.
///
/// A service that panics mid-mutation leaves whatever it already wrote in
/// place; later accessors see that state instead of an error.
fn recover<G, T: ?Sized>(lock: &RwLock<T>, err: PoisonError<G>, what: &str) -> G {
    tracing::warn!("{what} lock poisoned by a panicking holder, recovering");
    lock.clear_poison();
    err.into_inner()
}

fn acquire_read<'a, T>(
    lock: &'a RwLock<T>,
    contention: &AtomicU64,
    what: &str,
) -> RwLockReadGuard<'a, T> {
    match lock.try_read() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => {
            contention.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("{what} lock contended (read)");
            lock.read().unwrap_or_else(|e| recover(lock, e, what))
        }
        Err(TryLockError::Poisoned(e)) => recover(lock, e, what),
    }
}

fn acquire_write<'a, T>(
    lock: &'a RwLock<T>,
    contention: &AtomicU64,
    what: &str,
) -> RwLockWriteGuard<'a, T> {
    match lock.try_write() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => {
            contention.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("{what} lock contended (write)");
            lock.write().unwrap_or_else(|e| recover(lock, e, what))
        }
        Err(TryLockError::Poisoned(e)) => recover(lock, e, what),
    }
}
