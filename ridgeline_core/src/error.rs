//! Error taxonomy for the simulation control core.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the engine, its registries and its serializers.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing, contradictory or malformed parameters. Always raised while
    /// building the engine, never deferred into the run.
    #[error("Configuration error [{key}]: {message}")]
    Configuration { key: String, message: String },
    
    /// A node field became NaN or infinite after a model step
    #[error("Model became unstable: field '{field}' is not finite at t={time}")]
    Instability { field: String, time: f64 },
    
    /// A requested grid field does not exist
    #[error("Unknown field: {0}")]
    UnknownField(String),
    
    /// The serialization format cannot represent this grid topology
    #[error("Format does not support {0} grids")]
    Unsupported(String),
    
    /// An output writer failed; the run is aborted
    #[error("Output writer '{name}' failed: {message}")]
    Writer { name: String, message: String },
    
    /// A checkpoint could not be written or restored
    #[error("Checkpoint error ({path:?}): {message}")]
    Checkpoint { path: PathBuf, message: String },
    
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Creates a configuration error for `key`.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }
    
    /// Creates a writer failure.
    pub fn writer(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Writer {
            name: name.into(),
            message: message.to_string(),
        }
    }
    
    /// Returns true for configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type ModelResult<T> = Result<T, ModelError>;
