//! seekr: OSINT data collection core.
//!
//! Loads configuration, lets statically registered extensions adjust it,
//! then serves an HTTP API over the shared database while a background
//! scheduler (seekrd) runs services against the same state.
//!
//! # Architecture
//!
//! - **Config**: TOML settings for the server, files and seekrd
//! - **Extensions**: named units applied in order to the working config
//! - **State**: one `SharedState` per process, one lock per sub-resource
//! - **Scheduler**: fixed-interval ticker on its own thread
//! - **Server**: axum JSON API over the shared state

pub mod config;
pub mod database;
pub mod error;
pub mod extensions;
pub mod scheduler;
pub mod server;
pub mod startup;
pub mod state;

pub use config::SeekrConfig;
pub use database::{DataBase, Person};
pub use error::{Result, SeekrError};
pub use extensions::{Extension, ExtensionCatalog};
pub use scheduler::{Scheduler, SchedulerHandle, ServiceRegistry};
pub use state::{ApiConfig, SharedState};
