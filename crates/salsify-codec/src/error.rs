//! Codec error types.
//!
//! The taxonomy matters for recovery: `Invalid` is confined to the frame that
//! caused it (the decoder state is untouched and the next frame is
//! attempted), `Unsupported` ends the session cleanly, `Internal` is a bug.

use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Error, Debug)]
pub enum CodecError {
    /// Malformed input violating a bitstream invariant. Frame-local: drop
    /// the frame, keep the decoder state, try the next one.
    #[error("invalid frame: {0}")]
    Invalid(String),

    /// Well-formed input using a feature outside the supported profile.
    /// Fatal for the session.
    #[error("unsupported VP8 feature: {0}")]
    Unsupported(String),

    /// Invariant violation that indicates a bug in this codec.
    #[error("internal error in {operation}: {message}")]
    Internal {
        operation: &'static str,
        message: String,
    },
}

impl CodecError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Internal {
            operation,
            message: message.into(),
        }
    }

    /// Whether recovery is possible at the frame boundary.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

impl From<salsify_core::CoreError> for CodecError {
    fn from(err: salsify_core::CoreError) -> Self {
        CodecError::Invalid(err.to_string())
    }
}
