/*!
Error types for the undel core engine.
*/

use thiserror::Error;

/// Result type used throughout the undel core.
pub type Result<T> = std::result::Result<T, UndoError>;

/// Errors that can occur while scheduling, restoring or archiving deletions.
#[derive(Error, Debug)]
pub enum UndoError {
    /// No undo event exists for the token
    #[error("Undo token not found: {0}")]
    NotFound(String),

    /// The undo window has closed, or the event was already handled
    #[error("The undo window has closed for token {token}")]
    ExpiredToken { token: String },

    /// A persistence conflict surfaced while rebuilding the entity graph
    #[error("Restore conflict: {0}")]
    RestoreConflict(String),

    /// Programmer error, e.g. scheduling an entity that was never persisted
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The registry has no entity type with this name
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    /// Entity validation rules rejected a write
    #[error("Validation error: {0}")]
    Validation(String),

    /// A unique field collided with an existing row
    #[error("Uniqueness violation: {0}")]
    Uniqueness(String),

    /// A reference field points at a row that does not exist, or a row that is
    /// still referenced was about to be destroyed
    #[error("Reference constraint violation: {0}")]
    ReferenceConstraint(String),

    /// Integrity check failures
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Invalid snapshot or archive format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UndoError {
    pub fn expired<S: Into<String>>(token: S) -> Self {
        Self::ExpiredToken {
            token: token.into(),
        }
    }

    pub fn argument<S: Into<String>>(msg: S) -> Self {
        Self::Argument(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from the persistence layer rejecting a write.
    ///
    /// These are the errors `restore` reports as [`UndoError::RestoreConflict`].
    pub fn is_persistence_conflict(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Uniqueness(_) | Self::ReferenceConstraint(_)
        )
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Storage(_))
    }

    /// HTTP-equivalent status for the calling layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::ExpiredToken { .. } => 422,
            Self::RestoreConflict(_)
            | Self::Uniqueness(_)
            | Self::ReferenceConstraint(_) => 409,
            Self::Validation(_) => 422,
            _ => 500,
        }
    }
}
