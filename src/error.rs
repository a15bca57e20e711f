//! Error types for spop-agent.

use thiserror::Error;

/// Main error type for all agent operations.
#[derive(Debug, Error)]
pub enum SpopError {
    /// I/O error on the connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame received out of the allowed state sequence, or an invalid
    /// length prefix. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame body could not be decoded. Fatal to the connection.
    #[error("frame decode error: {0}")]
    Decode(String),

    /// Frame could not be serialized (e.g. exceeds the negotiated frame
    /// size). Nothing partial is ever written for such a frame.
    #[error("frame encode error: {0}")]
    Encode(String),

    /// Connection closed while a send was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using SpopError.
pub type Result<T> = std::result::Result<T, SpopError>;
