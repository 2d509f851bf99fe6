//! Error types for the coordination layer.

use thiserror::Error;

/// Errors from broker connectivity, provisioning, and publishing.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The broker stayed unreachable through every connection attempt.
    /// Fatal: callers abort startup rather than retrying further.
    #[error("broker connection failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The final connection error.
        last: String,
    },

    /// An operation was invoked after `disconnect()` (or before `connect()`).
    #[error("not connected to broker")]
    NotConnected,

    /// A stream could not be created or looked up.
    #[error("stream provisioning failed: {0}")]
    Stream(String),

    /// A durable consumer could not be created or looked up.
    #[error("consumer setup failed: {0}")]
    Consumer(String),

    /// A core subscription could not be established.
    #[error("subscription failed: {0}")]
    Subscribe(String),

    /// A publish (core or JetStream) failed or its ack did not arrive.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A payload could not be serialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
