//! Transport boundary errors.

use thiserror::Error;

/// Raised when a message cannot cross the transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying channel rejected or dropped the message.
    #[error("failed to send over the transport: {0}")]
    SendFailed(String),

    /// The transport is no longer connected.
    #[error("transport closed")]
    Closed,

    /// The envelope could not be serialized for the wire.
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}
