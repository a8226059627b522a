//! Transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Malformed packet; confined to the datagram that caused it.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// Bookkeeping invariant violation (a bug).
    #[error("internal error in {operation}: {message}")]
    Internal {
        operation: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPacket(message.into())
    }

    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Internal {
            operation,
            message: message.into(),
        }
    }
}
