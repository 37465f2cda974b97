//! Statically registered extensions.
//!
//! An [`Extension`] receives the working [`ApiConfig`] before the server and
//! scheduler start and returns a (possibly modified) one. Extensions can
//! change settings, seed the database, or register services.
//!
//! Which extensions run is decided at startup by a list of names, usually
//! taken from the `SEEKR_PLUGINS` environment variable. Names are resolved
//! against an [`ExtensionCatalog`] compiled into the binary.

pub mod builtin;

use crate::error::{Result, SeekrError};
use crate::state::ApiConfig;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Environment variable holding the comma-separated extension list.
pub const PLUGINS_ENV_VAR: &str = "SEEKR_PLUGINS";

/// A unit that mutates the working configuration once at startup.
pub trait Extension: Send + Sync {
    /// Name the extension is requested under (e.g. `"heartbeat"`).
    fn name(&self) -> &str;

    /// Short human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Take the current working config and return the next one.
    fn mutate(&self, config: ApiConfig) -> Result<ApiConfig>;
}

type MutateFn = Box<dyn Fn(ApiConfig) -> Result<ApiConfig> + Send + Sync>;

/// Extension backed by a closure.
pub struct FnExtension {
    name: String,
    mutate: MutateFn,
}

impl FnExtension {
    /// Wrap `mutate` as an extension called `name`.
    pub fn new<F>(name: impl Into<String>, mutate: F) -> Self
    where
        F: Fn(ApiConfig) -> Result<ApiConfig> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            mutate: Box::new(mutate),
        }
    }
}

impl Extension for FnExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn mutate(&self, config: ApiConfig) -> Result<ApiConfig> {
        (self.mutate)(config)
    }
}

/// The set of extensions a binary knows about.
#[derive(Default)]
pub struct ExtensionCatalog {
    extensions: Vec<Box<dyn Extension>>,
}

impl ExtensionCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every extension shipped in this crate.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(Box::new(builtin::Heartbeat));
        catalog.register(Box::new(builtin::SeedExample));
        catalog
    }

    /// Add an extension. A later registration shadows an earlier one with the same name.
    pub fn register(&mut self, extension: Box<dyn Extension>) {
        self.extensions.push(extension);
    }

    /// Add a closure-backed extension.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, mutate: F)
    where
        F: Fn(ApiConfig) -> Result<ApiConfig> + Send + Sync + 'static,
    {
        self.register(Box::new(FnExtension::new(name, mutate)));
    }

    /// Look up an extension by name.
    pub fn get(&self, name: &str) -> Option<&dyn Extension> {
        self.extensions
            .iter()
            .rev()
            .find(|e| e.name() == name)
            .map(|e| e.as_ref())
    }

    /// Names of all registered extensions.
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// `(name, description)` of every registered extension, in registration order.
    pub fn describe(&self) -> Vec<(&str, &str)> {
        self.extensions
            .iter()
            .map(|e| (e.name(), e.description()))
            .collect()
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Apply the extensions named in `names`, in order, to `config`.
    ///
    /// Each extension receives the config returned by the previous one. The
    /// first unknown name or failing extension aborts the whole call and
    /// later names are never touched. An empty list returns `config` as is.
    /// A name listed more than once is applied at its first position only.
    pub fn open(&self, names: &[String], config: ApiConfig) -> Result<ApiConfig> {
        let mut config = config;
        let mut applied = HashSet::new();
        for name in names {
            if !applied.insert(name.as_str()) {
                warn!(extension = %name, "extension listed more than once, skipping repeat");
                continue;
            }
            let extension = self.get(name).ok_or_else(|| SeekrError::Extension {
                name: name.clone(),
                reason: "no such extension".to_owned(),
            })?;

            debug!(extension = %name, "applying extension");
            config = extension.mutate(config).map_err(|e| SeekrError::Extension {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            info!(extension = %name, services = config.services.len(), "extension loaded");
        }
        Ok(config)
    }
}

impl std::fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCatalog")
            .field("extensions", &self.describe())
            .finish()
    }
}

/// Split a comma-separated extension list, trimming blanks and dropping empty entries.
pub fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Extension names from [`PLUGINS_ENV_VAR`]; unset or empty yields an empty list.
pub fn extension_names_from_env() -> Vec<String> {
    std::env::var(PLUGINS_ENV_VAR)
        .map(|raw| parse_extension_list(&raw))
        .unwrap_or_default()
}
