//! Container format error types.

use thiserror::Error;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid {container} file: {message}")]
    Invalid {
        container: &'static str,
        message: String,
    },

    #[error("unsupported {container} feature: {feature}")]
    Unsupported {
        container: &'static str,
        feature: String,
    },

    #[error("frame index {index} out of range ({count} frames)")]
    FrameOutOfRange { index: usize, count: usize },
}

impl FormatError {
    pub fn invalid(container: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            container,
            message: message.into(),
        }
    }

    pub fn unsupported(container: &'static str, feature: impl Into<String>) -> Self {
        Self::Unsupported {
            container,
            feature: feature.into(),
        }
    }
}
