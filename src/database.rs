//! Collected entities and their JSON file format.
//!
//! The database is a keyed map from person id to [`Person`]. The map key is
//! always taken from [`Person::id`], so an id can never point at two records.

use crate::error::{Result, SeekrError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// A person record collected by seekr.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Unique identifier; also the database key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Age in years, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
    /// Accounts found for this person, keyed by service name.
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
    /// Labels attached by the user or by services.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Person {
    /// Create a person with just an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Keyed collection of [`Person`] records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBase {
    people: HashMap<String, Person>,
}

impl DataBase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a person, keyed by its id. Returns the previous record.
    pub fn insert(&mut self, person: Person) -> Option<Person> {
        self.people.insert(person.id.clone(), person)
    }

    /// Look up a person by id.
    pub fn get(&self, id: &str) -> Option<&Person> {
        self.people.get(id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Person> {
        self.people.get_mut(id)
    }

    /// Remove a person by id.
    pub fn remove(&mut self, id: &str) -> Option<Person> {
        self.people.remove(id)
    }

    /// Whether a record exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.people.contains_key(id)
    }

    /// Iterate over all records (no defined order).
    pub fn iter(&self) -> impl Iterator<Item = &Person> {
        self.people.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.people.len()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Load a database from a JSON file. A missing file yields an empty database.
    ///
    /// Records whose key disagrees with their `id` are re-keyed by `id`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(SeekrError::Database(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        let raw: HashMap<String, Person> = serde_json::from_slice(&bytes)
            .map_err(|e| SeekrError::Database(format!("cannot parse {}: {e}", path.display())))?;

        let mut db = Self::new();
        for (key, person) in raw {
            if key != person.id {
                tracing::warn!(key = %key, id = %person.id, "database key does not match id, re-keying");
            }
            db.insert(person);
        }
        Ok(db)
    }

    /// Write the database to a JSON file.
    ///
    /// Writes to a sibling temp file first and renames it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SeekrError::Database(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| SeekrError::Database(format!("cannot serialize database: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| SeekrError::Database(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| SeekrError::Database(format!("cannot replace {}: {e}", path.display())))?;
        Ok(())
    }
}
