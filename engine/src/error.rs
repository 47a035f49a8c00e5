//! Error types for the deploy engine.
//!
//! The primary error type is `EngineError`, which represents job-level errors
//! that prevent a deployment from being planned or executed. Per-file and
//! per-operation errors are recorded in the job's `RunReport`, not as
//! EngineError.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors that stop a deployment before (or instead of) executing it.
///
/// Any of these leaves the cache file untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration file does not exist
    #[error("Config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// Configuration file exists but could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    /// Configuration file is syntactically invalid
    #[error("Invalid config file {} (line {line}): {reason}", path.display())]
    ConfigParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A required field is missing or a value is out of range
    #[error("Invalid config value for [{field}]: {reason}")]
    ConfigInvalid { field: String, reason: String },

    /// Config file already exists (on init)
    #[error("Config file already exists: {}", path.display())]
    ConfigExists { path: PathBuf },

    /// Origin directory does not exist
    #[error("Origin folder not found: {}", path.display())]
    OriginNotFound { path: PathBuf },

    /// Origin path exists but is not a directory
    #[error("Origin is not a directory: {}", path.display())]
    OriginNotDirectory { path: PathBuf },

    /// Origin directory is not accessible (permissions)
    #[error("Origin folder access denied: {}", path.display())]
    OriginAccessDenied { path: PathBuf, source: io::Error },

    /// Failed to read a local file
    #[error("Failed to read file: {}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write the cache file
    #[error("Failed to write cache file {}: {source}", path.display())]
    CacheWrite { path: PathBuf, source: io::Error },

    /// Initial connection or login failed
    #[error("Could not connect to {host}: {source}")]
    Connect { host: String, source: TransportError },

    /// Job function called in the wrong lifecycle state
    #[error("Invalid job state: {reason}")]
    InvalidState { reason: String },

    /// Catch-all for unexpected errors
    #[error("Engine error: {message}")]
    Unknown { message: String },
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Unknown {
            message: err.to_string(),
        }
    }
}
