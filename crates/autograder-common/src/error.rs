//! Per-submission stage errors.
//!
//! Each variant is attributed to exactly one pipeline stage. They are caught at
//! the evaluator boundary and frozen into a [`StageFailure`](crate::StageFailure);
//! the report layer only ever sees the classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error that stops a single submission's evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Archive name does not carry a valid identifier, or the archive is missing
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Extraction command failed
    #[error("Extraction failed: {details}")]
    Extract { details: String },

    /// Build command failed
    #[error("Build failed: {details}")]
    Build { details: String },

    /// No executable found after a successful build
    #[error("No executable found in {0}")]
    BinaryNotFound(String),
}

impl StageError {
    /// The pipeline stage this error belongs to
    pub fn kind(&self) -> StageErrorKind {
        match self {
            StageError::InvalidIdentifier(_) => StageErrorKind::InvalidIdentifier,
            StageError::Extract { .. } => StageErrorKind::Extract,
            StageError::Build { .. } => StageErrorKind::Build,
            StageError::BinaryNotFound(_) => StageErrorKind::BinaryNotFound,
        }
    }

    /// Captured diagnostic text carried by the error
    pub fn details(&self) -> &str {
        match self {
            StageError::InvalidIdentifier(details)
            | StageError::Extract { details }
            | StageError::Build { details }
            | StageError::BinaryNotFound(details) => details,
        }
    }
}

/// Classification of a stage failure, as rendered in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageErrorKind {
    InvalidIdentifier,
    Extract,
    Build,
    BinaryNotFound,
}

impl StageErrorKind {
    /// Human-readable comment used in reports
    pub fn describe(&self) -> &'static str {
        match self {
            StageErrorKind::InvalidIdentifier => "Invalid submission name",
            StageErrorKind::Extract => "Error extracting the submission",
            StageErrorKind::Build => "Error building the submission",
            StageErrorKind::BinaryNotFound => "Error finding the executable",
        }
    }
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageErrorKind::InvalidIdentifier => write!(f, "INVALID_IDENTIFIER"),
            StageErrorKind::Extract => write!(f, "EXTRACT_ERROR"),
            StageErrorKind::Build => write!(f, "BUILD_ERROR"),
            StageErrorKind::BinaryNotFound => write!(f, "BINARY_NOT_FOUND"),
        }
    }
}
