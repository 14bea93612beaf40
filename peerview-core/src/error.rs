//! Error types for PeerView

use std::time::Duration;
use thiserror::Error;

/// Why the media engine refused to open a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOpenFailure {
    /// The source could not be read
    IoFailure,
    /// The source or one of its options was rejected
    InvalidArgument,
}

impl std::fmt::Display for EngineOpenFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineOpenFailure::IoFailure => write!(f, "I/O failure"),
            EngineOpenFailure::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

/// Main error type for PeerView operations
#[derive(Error, Debug)]
pub enum PeerViewError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// A configuration value was rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong with it
        reason: String,
    },

    /// The engine could not open a media source
    #[error("Failed to open {uri} ({kind}): {reason}")]
    EngineOpen {
        /// Source that failed to open
        uri: String,
        /// Failure category reported by the engine
        kind: EngineOpenFailure,
        /// Engine supplied detail
        reason: String,
    },

    /// The engine reported an error while running
    #[error("Engine error (framework {code}, impl {subcode})")]
    EngineRuntime {
        /// Framework error code
        code: i32,
        /// Implementation specific sub-code
        subcode: i32,
    },

    /// An engine instance is still active
    #[error("Media engine already active (generation {generation})")]
    EngineAlreadyActive {
        /// Generation of the active instance
        generation: u64,
    },

    /// A callback referenced a surface that is not the bound one
    #[error("Surface mismatch: expected {expected:?}, got {actual}")]
    SurfaceMismatch {
        /// Handle of the currently attached surface, if any
        expected: Option<u64>,
        /// Handle carried by the stale callback
        actual: u64,
    },

    /// The peer connection reported an error
    #[error("Peer connection error: {reason}")]
    PeerConnection {
        /// Description from the peer connection library
        reason: String,
    },

    /// The signaling channel reported an error
    #[error("Signaling channel error: {reason}")]
    SignalingChannel {
        /// Description from the signaling channel
        reason: String,
    },

    /// A session start was requested while another one is pending
    #[error("A peer session is already pending")]
    SessionPending,

    /// The session was closed before it produced a connection
    #[error("Peer session closed: {reason}")]
    SessionClosed {
        /// Why the session ended
        reason: String,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Invalid data error
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// Reason for invalid data
        reason: String,
    },

    /// Invalid message format
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PeerViewError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            PeerViewError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            PeerViewError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            PeerViewError::EngineOpen { .. } => "ENGINE_OPEN_FAILED".to_string(),
            PeerViewError::EngineRuntime { .. } => "ENGINE_RUNTIME_ERROR".to_string(),
            PeerViewError::EngineAlreadyActive { .. } => "ENGINE_ALREADY_ACTIVE".to_string(),
            PeerViewError::SurfaceMismatch { .. } => "SURFACE_MISMATCH".to_string(),
            PeerViewError::PeerConnection { .. } => "PEER_CONNECTION_ERROR".to_string(),
            PeerViewError::SignalingChannel { .. } => "SIGNALING_CHANNEL_ERROR".to_string(),
            PeerViewError::SessionPending => "SESSION_PENDING".to_string(),
            PeerViewError::SessionClosed { .. } => "SESSION_CLOSED".to_string(),
            PeerViewError::InvalidState { .. } => "INVALID_STATE".to_string(),
            PeerViewError::Timeout { .. } => "TIMEOUT".to_string(),
            PeerViewError::InvalidData { .. } => "INVALID_DATA".to_string(),
            PeerViewError::InvalidMessage { .. } => "INVALID_MESSAGE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = PeerViewError::EngineRuntime { code: 1, subcode: -1004 };
        assert_eq!(err.error_code(), "ENGINE_RUNTIME_ERROR");
        assert!(err.to_string().contains("-1004"));

        let err = PeerViewError::SurfaceMismatch { expected: Some(1), actual: 2 };
        assert_eq!(err.error_code(), "SURFACE_MISMATCH");
    }

    #[test]
    fn test_engine_open_display() {
        let err = PeerViewError::EngineOpen {
            uri: "rtsp://camera/stream".to_string(),
            kind: EngineOpenFailure::IoFailure,
            reason: "connection refused".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("rtsp://camera/stream"));
        assert!(text.contains("I/O failure"));
    }
}
