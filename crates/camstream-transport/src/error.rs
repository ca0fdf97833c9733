//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Destination could not be resolved to a socket address.
    #[error("Failed to resolve {0}")]
    Resolve(String),

    /// Local socket could not be created.
    #[error("Failed to bind socket: {0}")]
    Bind(String),

    /// Datagram was not sent.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Payload exceeds one datagram and the policy is to drop it.
    #[error("Payload of {size} bytes exceeds datagram limit of {limit}")]
    Oversized { size: usize, limit: usize },

    /// Sink has been closed.
    #[error("Sink closed")]
    Closed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
