//! Error types shared by the orchestration engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop the scheduler from being started at all.
#[derive(Error, Debug)]
pub enum InitError {
    /// No task definition registered a single task.
    #[error("no task found for the backup process")]
    NoTasks,

    #[error("task definition '{name}' failed: {source}")]
    Definition {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that abort a single backup run. The scheduler re-arms after any of them.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("task '{name}' failed: {source}")]
    Task {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to stage {path:?}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to compress {staging:?} into {archive:?}: {source}")]
    Compression {
        staging: PathBuf,
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to export {archive:?}: {source}")]
    Export {
        archive: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("remote session failed: {0}")]
    RemoteConnection(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using [`BackupError`].
pub type Result<T> = std::result::Result<T, BackupError>;
