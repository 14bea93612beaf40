//! Frame types and tracked regions

use crate::error::MediaError;
use image::RgbaImage;
use std::time::{Duration, Instant};

/// Decoded RGBA8 video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Tightly packed RGBA8 pixels
    pub data: Vec<u8>,
    /// Timestamp in milliseconds
    pub timestamp: u64,
}

impl VideoFrame {
    /// Create a frame from packed RGBA8 pixels
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp: u64) -> Self {
        Self {
            width,
            height,
            data,
            timestamp,
        }
    }

    /// Byte length a valid frame of this size has
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Check the pixel buffer against the frame size
    pub fn validate(&self) -> Result<(), MediaError> {
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(MediaError::InvalidFrameData {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Copy the frame into a bitmap
    pub fn to_image(&self) -> Result<RgbaImage, MediaError> {
        self.validate()?;
        RgbaImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            MediaError::InvalidFrameData {
                expected: self.expected_len(),
                actual: self.data.len(),
            },
        )
    }
}

/// Axis-aligned bounding box of a tracked object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRegion {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// When the object was found
    pub discovered_at: Instant,
}

impl TrackedRegion {
    /// Region discovered now
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::discovered_at(x, y, width, height, Instant::now())
    }

    /// Region discovered at a given instant
    pub fn discovered_at(x: u32, y: u32, width: u32, height: u32, at: Instant) -> Self {
        Self {
            x,
            y,
            width,
            height,
            discovered_at: at,
        }
    }

    /// Zero-area regions carry no position
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Center point
    pub fn center(&self) -> (u32, u32) {
        (
            self.x.saturating_add(self.width / 2),
            self.y.saturating_add(self.height / 2),
        )
    }

    /// Whether the region is older than `threshold` at `now`
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.discovered_at) > threshold
    }
}

/// A decoded frame and the object found in it, if any
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Pixels
    pub frame: VideoFrame,
    /// Object found in this frame
    pub region: Option<TrackedRegion>,
}

impl DecodedFrame {
    /// Frame without tracking data
    pub fn new(frame: VideoFrame) -> Self {
        Self {
            frame,
            region: None,
        }
    }

    /// Attach a tracked region
    pub fn with_region(mut self, region: TrackedRegion) -> Self {
        self.region = Some(region);
        self
    }
}
