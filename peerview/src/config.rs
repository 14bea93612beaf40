//! Configuration types and defaults

use peerview_core::PlaybackConfig;
use peerview_media::{DisplayMode, PanFollowConfig};
use peerview_signaling::SessionConfig;
use std::time::Duration;

/// Global PeerView configuration
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Enable debug logging
    pub debug_logging: bool,
    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Runtime worker threads; `None` uses one per core
    pub worker_threads: Option<usize>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_filter: "peerview=debug,peerview_core=debug,peerview_signaling=debug".to_string(),
            worker_threads: None,
        }
    }
}

/// Per-view configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Playback state machine settings
    pub playback: PlaybackConfig,
    /// Pan/follow renderer settings
    pub pan_follow: PanFollowConfig,
    /// Peer session settings
    pub session: SessionConfig,
    /// How long a session start may take before it is abandoned
    pub session_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            pan_follow: PanFollowConfig::default(),
            session: SessionConfig::default(),
            session_timeout: Duration::from_secs(30),
        }
    }
}

impl PlayerConfig {
    /// Display mode the view starts in
    pub fn display_mode(&self) -> DisplayMode {
        self.pan_follow.mode
    }
}
