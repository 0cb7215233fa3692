//! Error types for dose accumulation and checkpoint merging

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoseError {
    #[error("Invalid scoring configuration: {0}")]
    Config(String),

    #[error("Cannot resolve detector mass: {0}")]
    MassResolution(String),

    #[error("Directory not found: {0:?}")]
    MissingDirectory(PathBuf),

    #[error("Malformed checkpoint row: {0}")]
    MalformedRow(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DoseError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        DoseError::Config(message.into())
    }

    /// Creates a mass resolution error.
    pub fn mass(message: impl Into<String>) -> Self {
        DoseError::MassResolution(message.into())
    }

    /// Whether the error must abort the run rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DoseError::Config(_) | DoseError::MassResolution(_))
    }
}
