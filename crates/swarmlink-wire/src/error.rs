//! Error types for the wire layer.

use thiserror::Error;

/// Errors from message parsing, validation, and dispatch.
#[derive(Debug, Error)]
pub enum WireError {
    /// The message could not be deserialized (missing required fields or
    /// unparseable JSON).
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message failed validation; each entry describes one problem.
    /// Duplicate delivery of an already-seen message_id is reported here.
    #[error("message validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}
