//! # PeerView Diagnostics
//!
//! Logging setup and connection-health reporting for PeerView.
//! Provides the global tracing subscriber and the peer session timeline.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;
pub mod session_timeline;

// Re-export main types
pub use debug_logger::{DebugLogger, DEFAULT_FILTER};
pub use session_timeline::{Milestone, MilestoneRecord, SessionTimeline, TimelineReport};
