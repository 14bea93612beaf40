//! # PeerView Media
//!
//! Frame types, video sinks and the pan/follow renderer that smooths a
//! tracked-object box into a stable viewport crop.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pan_follow;
pub mod sink;
pub mod tracks;

// Re-export main types
pub use error::{MediaError, MediaResult};
pub use pan_follow::{
    pan_step, pan_step_with, DisplayMode, FrameTarget, PanFollowConfig, PanFollowRenderer,
    RenderOutput, ViewportCursor, MIN_PAN_DISTANCE, STALE_REGION_THRESHOLD, TRACKING_SPEED,
};
pub use sink::{ProxyVideoSink, VideoSink};
pub use tracks::{DecodedFrame, TrackedRegion, VideoFrame};
