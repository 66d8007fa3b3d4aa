//! Common types and errors shared by the autograder pipeline.

pub mod error;
pub mod types;

pub use error::{StageError, StageErrorKind};
pub use types::*;
