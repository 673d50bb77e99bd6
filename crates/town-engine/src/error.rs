//! Error types for the engine binary.
//!
//! [`EngineError`] covers the failures that can stop the engine during
//! startup. Runtime failures of individual mutations are logged and the
//! engine keeps running.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: town_core::ConfigError,
    },

    /// The store could not be opened.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: town_core::StoreError,
    },

    /// The file watcher could not be started.
    #[error("watcher error: {source}")]
    Watcher {
        /// The underlying notify error.
        #[from]
        source: notify::Error,
    },

    /// A watched directory could not be created.
    #[error("cannot prepare {path}: {source}")]
    Directory {
        /// The directory.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
