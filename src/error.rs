//! Error types for the Pennant library.
//!
//! All errors are represented by the [`PennantError`] enum. Besides the
//! usual I/O and storage failures, the enum carries the failure model of the
//! document buffer:
//!
//! - [`PennantError::Aborting`] marks a failure that left shared buffering
//!   state (arenas, postings, the wait queue) in an unknown condition. The
//!   buffer discards everything since the last flush when it sees one.
//! - Every other variant raised while a single document is processed only
//!   affects that document, which is then buffered as a delete.
//!
//! # Examples
//!
//! ```
//! use pennant::error::{PennantError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(PennantError::invalid_argument("Invalid input"))
//! }
//!
//! let err = example_operation().unwrap_err();
//! assert!(!err.is_aborting());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Pennant operations.
#[derive(Error, Debug)]
pub enum PennantError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Analysis-related errors (token streams, token data)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Field-related errors
    #[error("Field error: {0}")]
    Field(String),

    /// A corrupting failure; all buffered state must be aborted.
    #[error("Aborting error: {0}")]
    Aborting(String),

    /// The document was discarded because an abort was in progress.
    #[error("Document discarded: buffer was aborted")]
    Aborted,

    /// The writer has been closed.
    #[error("This documents writer is closed")]
    AlreadyClosed,

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Errors raised by pluggable external collaborators
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with PennantError.
pub type Result<T> = std::result::Result<T, PennantError>;

impl PennantError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        PennantError::Index(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        PennantError::Analysis(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PennantError::Storage(msg.into())
    }

    /// Create a new field error.
    pub fn field<S: Into<String>>(msg: S) -> Self {
        PennantError::Field(msg.into())
    }

    /// Create a new aborting error.
    pub fn aborting<S: Into<String>>(msg: S) -> Self {
        PennantError::Aborting(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PennantError::Other(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        PennantError::Other(format!("Invalid configuration: {}", msg.into()))
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        PennantError::Other(format!("Invalid argument: {}", msg.into()))
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PennantError::Other(format!("Internal error: {}", msg.into()))
    }

    /// Whether this error corrupted shared buffering state.
    pub fn is_aborting(&self) -> bool {
        matches!(self, PennantError::Aborting(_))
    }

    /// Promote any error into an aborting one, keeping its message.
    pub fn into_aborting(self) -> Self {
        match self {
            PennantError::Aborting(_) => self,
            other => PennantError::Aborting(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = PennantError::index("Test index error");
        assert_eq!(error.to_string(), "Index error: Test index error");

        let error = PennantError::analysis("bad token");
        assert_eq!(error.to_string(), "Analysis error: bad token");

        let error = PennantError::aborting("pool exhausted");
        assert_eq!(error.to_string(), "Aborting error: pool exhausted");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = PennantError::from(io_error);

        match error {
            PennantError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_aborting_classification() {
        assert!(PennantError::aborting("x").is_aborting());
        assert!(!PennantError::analysis("x").is_aborting());
        assert!(!PennantError::Aborted.is_aborting());

        let promoted = PennantError::storage("disk full").into_aborting();
        assert!(promoted.is_aborting());
        assert_eq!(
            promoted.to_string(),
            "Aborting error: Storage error: disk full"
        );
    }
}
