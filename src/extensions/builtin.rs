//! Extensions shipped with seekr.

use super::Extension;
use crate::database::Person;
use crate::error::Result;
use crate::state::ApiConfig;

/// Name of the [`Heartbeat`] extension.
pub const HEARTBEAT: &str = "heartbeat";

/// Name of the [`SeedExample`] extension.
pub const SEED_EXAMPLE: &str = "seed-example";

/// Id of the record inserted by [`SeedExample`].
pub const SEED_EXAMPLE_ID: &str = "1";

/// Registers a repeating `heartbeat` service that logs the database size.
pub struct Heartbeat;

impl Extension for Heartbeat {
    fn name(&self) -> &str {
        HEARTBEAT
    }

    fn description(&self) -> &str {
        "log the number of collected records on every seekrd tick"
    }

    fn mutate(&self, mut config: ApiConfig) -> Result<ApiConfig> {
        config.services.register(
            HEARTBEAT,
            |state| {
                let records = state.read_db(|db| db.len())?;
                tracing::info!(records, "seekrd heartbeat");
                Ok(())
            },
            true,
        );
        Ok(config)
    }
}

/// Registers a run-once service that inserts an example person if id `1` is free.
pub struct SeedExample;

impl Extension for SeedExample {
    fn name(&self) -> &str {
        SEED_EXAMPLE
    }

    fn description(&self) -> &str {
        "insert an example person on the first seekrd tick"
    }

    fn mutate(&self, mut config: ApiConfig) -> Result<ApiConfig> {
        config.services.register(
            SEED_EXAMPLE,
            |state| {
                state.write_db(|db| {
                    if !db.contains(SEED_EXAMPLE_ID) {
                        let mut person = Person::new(SEED_EXAMPLE_ID, "Example Person");
                        person.tags.push("example".to_owned());
                        db.insert(person);
                    }
                })
            },
            false,
        );
        Ok(config)
    }
}
