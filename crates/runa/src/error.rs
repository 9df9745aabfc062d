//! Error types for the fallible, I/O-facing parts of the crate.
//!
//! Misuse of the in-memory API (stale slots, unregistered types) panics;
//! lookups that can legitimately miss return `Option`. Only reading and
//! writing files produces these errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while saving or loading an entity document.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot access entity file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed entity file `{}`", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("entity document version {found} is newer than the supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("cannot convert component `{component}`")]
    Component {
        component: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot convert script `{script}`")]
    Script {
        script: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("entity {0} is not alive")]
    DeadEntity(crate::ecs::Entity),

    #[error("entity name `{0}` cannot be used as a file name")]
    InvalidName(String),
}

/// Failure while reading a [`SceneConfig`](crate::config::SceneConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file `{}`", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
