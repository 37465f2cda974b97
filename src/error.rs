//! Error types for seekr.

/// Top-level error type for the seekr core.
#[derive(Debug, thiserror::Error)]
pub enum SeekrError {
    /// Configuration could not be parsed or failed validation.
    #[error("config error: {0}")]
    Config(String),

    /// No configuration file exists at the requested path.
    ///
    /// Callers treat this as recoverable and continue with defaults.
    #[error("no config file at {0}")]
    NoConfigFile(std::path::PathBuf),

    /// An extension could not be resolved or its mutation failed.
    #[error("extension '{name}' failed to load: {reason}")]
    Extension {
        /// Name the extension was requested under.
        name: String,
        /// Human-readable cause.
        reason: String,
    },

    /// A scheduled service returned an error or panicked.
    #[error("service '{name}' failed: {reason}")]
    Task {
        /// Service name.
        name: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Shared state could not be accessed (poisoned lock).
    #[error("shared state error: {0}")]
    State(String),

    /// Database file could not be read, parsed or written.
    #[error("database error: {0}")]
    Database(String),

    /// API server failed to bind or serve.
    #[error("server error: {0}")]
    Server(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeekrError {
    /// Shorthand used by task bodies to report a failure.
    pub fn task(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Task {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SeekrError>;
