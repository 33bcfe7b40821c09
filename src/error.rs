//! Error taxonomy for the scoring pipeline

use std::fmt;
use thiserror::Error;

/// Stable error kind reported to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Schema,
    Validation,
    ModelUnavailable,
    DegenerateBatch,
    Model,
    Storage,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Schema => "schema_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::ModelUnavailable => "model_unavailable_error",
            ErrorKind::DegenerateBatch => "degenerate_batch_error",
            ErrorKind::Model => "model_error",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Serialization => "serialization_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or unusable columns; the whole batch is rejected
    #[error("Schema error: {0}")]
    Schema(String),

    /// Unparseable or out-of-range values
    #[error("Validation error: {0}")]
    Validation(String),

    /// The frozen model could not be loaded at start-up
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Batch too small or too uniform for a statistic; callers fall back to defaults
    #[error("Degenerate batch: {0}")]
    DegenerateBatch(String),

    #[error("Model inference error: {0}")]
    Model(String),

    #[error("Artifact store error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Schema(_) => ErrorKind::Schema,
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            PipelineError::DegenerateBatch(_) => ErrorKind::DegenerateBatch,
            PipelineError::Model(_) => ErrorKind::Model,
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
