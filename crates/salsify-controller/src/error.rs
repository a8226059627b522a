//! Controller error types.

use thiserror::Error;

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("codec error: {0}")]
    Codec(#[from] salsify_codec::CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] salsify_transport::TransportError),

    #[error("encode pool error: {0}")]
    Pool(String),
}
