//! Error types for the discovery layer.

use thiserror::Error;

/// Error type for SSDP operations.
///
/// Malformed messages are recoverable (the datagram is dropped); bind and
/// closed-transport errors are fatal to the server instance that hit them.
#[derive(Debug, Error)]
pub enum SsdpError {
    /// The datagram is not a well-formed SSDP message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The transport socket could not be bound
    #[error("Bind failure: {0}")]
    BindFailure(String),

    /// The transport socket has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// Any other socket I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// An operation that needs a bound socket was called on an idle server
    #[error("Server is not listening")]
    NotListening,
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, SsdpError>;
