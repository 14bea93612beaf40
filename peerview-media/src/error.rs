//! Media error types
//!
//! Errors raised while validating frames and presenting them through the
//! pan/follow renderer.

use thiserror::Error;

/// Main error type for media operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// A frame target required by the display mode was not supplied
    #[error("Missing frame target: {target}")]
    MissingTarget {
        /// Which target is missing
        target: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            MediaError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            MediaError::InvalidFrameData { .. } => "INVALID_FRAME_DATA",
            MediaError::MissingTarget { .. } => "MISSING_TARGET",
        }
    }

    /// Whether the next frame can succeed without caller changes
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MediaError::InvalidFrameData { .. })
    }
}
