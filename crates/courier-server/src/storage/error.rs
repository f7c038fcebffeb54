//! Storage error types

use courier_core::MessageId;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Message row or delivery record does not exist
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// A message with this id is already stored
    #[error("message already exists: {0}")]
    Conflict(MessageId),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}
