//! Error types for the ridgeline run harness.

use ridgeline_core::ModelError;
use thiserror::Error;

/// Errors raised while running or exporting a reference model.
#[derive(Debug, Error)]
pub enum SimError {
    /// The engine or the model failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// No reference model with this name
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The run export could not be written
    #[error("Export to {path} failed: {message}")]
    Export { path: String, message: String },
}

impl SimError {
    /// Creates an export failure.
    pub fn export(path: impl Into<String>, e: impl std::fmt::Display) -> Self {
        Self::Export {
            path: path.into(),
            message: e.to_string(),
        }
    }
}
