//! Video sinks
//!
//! The peer connection writes frames into sinks it was handed at creation
//! time. [`ProxyVideoSink`] sits in between so the real target can be swapped
//! or detached without touching the connection.

use crate::tracks::VideoFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Receiver of decoded video frames
pub trait VideoSink: Send + Sync {
    /// Consume one frame
    fn on_frame(&self, frame: &VideoFrame);
}

/// Forwards frames to a replaceable target
#[derive(Default)]
pub struct ProxyVideoSink {
    target: Mutex<Option<Arc<dyn VideoSink>>>,
}

impl std::fmt::Debug for ProxyVideoSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyVideoSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl ProxyVideoSink {
    /// Create a detached proxy
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the target; `None` detaches it
    pub fn set_target(&self, target: Option<Arc<dyn VideoSink>>) {
        *self.target.lock() = target;
    }

    /// Whether a target is attached
    pub fn is_attached(&self) -> bool {
        self.target.lock().is_some()
    }
}

impl VideoSink for ProxyVideoSink {
    fn on_frame(&self, frame: &VideoFrame) {
        // Clone out so the target runs without the proxy lock held
        let target = self.target.lock().clone();
        match target {
            Some(target) => target.on_frame(frame),
            None => trace!("Dropping frame {}: no sink attached", frame.timestamp),
        }
    }
}
