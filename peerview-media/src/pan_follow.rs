//! Pan/follow rendering
//!
//! Turns a decoded frame plus a noisy tracked-object box into the bitmap(s)
//! to present. The half-size viewport never jumps to the object: every frame
//! the cursor moves a damped step toward the offset that centers the object,
//! so the crop pans smoothly and still converges.
//!
//! Three display modes are supported:
//! - [`DisplayMode::Follow`]: only the cropped viewport
//! - [`DisplayMode::PictureInPicture`]: the annotated full frame with the
//!   viewport as an inset
//! - [`DisplayMode::Annotate`]: only the annotated full frame
//!
//! When no object was found within the staleness window the full frame is
//! shown unmodified and the inset is hidden.

use crate::error::MediaError;
use crate::tracks::{DecodedFrame, TrackedRegion};
use image::{imageops, Rgba, RgbaImage};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How long a tracked region stays valid after it was found
pub const STALE_REGION_THRESHOLD: Duration = Duration::from_secs(3);

/// Deltas at or below this many pixels are covered in a single step
pub const MIN_PAN_DISTANCE: u32 = 5;

/// Fraction of the remaining delta covered per frame
pub const TRACKING_SPEED: f64 = 0.05;

/// Per-axis cursor step toward a target with the default tuning
pub fn pan_step(delta: i64) -> i64 {
    pan_step_with(delta, MIN_PAN_DISTANCE, TRACKING_SPEED)
}

/// Per-axis cursor step toward a target
///
/// Large deltas move by `speed` of the remaining distance, truncated but never
/// to zero; small ones are covered at once. With `speed` in `(0, 1]` the step
/// never overshoots.
pub fn pan_step_with(delta: i64, min_distance: u32, speed: f64) -> i64 {
    if delta.unsigned_abs() <= u64::from(min_distance) {
        return delta;
    }

    let step = (delta as f64 * speed) as i64;
    if step == 0 {
        delta.signum()
    } else {
        step
    }
}

/// What the renderer presents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Cropped viewport only
    #[default]
    Follow,
    /// Annotated full frame with the viewport as an inset
    PictureInPicture,
    /// Annotated full frame only
    Annotate,
}

/// Pan/follow tuning
#[derive(Debug, Clone)]
pub struct PanFollowConfig {
    /// Display mode
    pub mode: DisplayMode,
    /// Age after which a tracked region is ignored
    pub stale_after: Duration,
    /// Small-motion threshold in pixels
    pub min_distance: u32,
    /// Fraction of the delta covered per frame, in `(0, 1]`
    pub tracking_speed: f64,
    /// Overlay outline color
    pub overlay_color: Rgba<u8>,
    /// Overlay outline width in pixels
    pub overlay_stroke: u32,
}

impl Default for PanFollowConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Follow,
            stale_after: STALE_REGION_THRESHOLD,
            min_distance: MIN_PAN_DISTANCE,
            tracking_speed: TRACKING_SPEED,
            overlay_color: Rgba([255, 0, 0, 255]),
            overlay_stroke: 5,
        }
    }
}

/// Top-left offset of the viewport crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportCursor {
    /// Horizontal offset
    pub x: u32,
    /// Vertical offset
    pub y: u32,
}

/// Bitmaps produced for one frame
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// Bitmap for the main view
    pub primary: RgbaImage,
    /// Bitmap for the inset view, `None` when it must be hidden
    pub inset: Option<RgbaImage>,
}

/// A view a bitmap can be drawn into
pub trait FrameTarget {
    /// Replace the view's content
    fn draw_image(&mut self, image: &RgbaImage);

    /// Show or hide the view
    fn set_visible(&mut self, visible: bool);
}

/// Stateful pan/follow renderer; owns the viewport cursor
#[derive(Debug)]
pub struct PanFollowRenderer {
    config: PanFollowConfig,
    cursor: Option<ViewportCursor>,
    last_region: Option<TrackedRegion>,
}

impl PanFollowRenderer {
    /// Create a renderer
    pub fn new(config: PanFollowConfig) -> Result<Self, MediaError> {
        if !(config.tracking_speed > 0.0 && config.tracking_speed <= 1.0) {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "tracking speed must be in (0, 1], got {}",
                    config.tracking_speed
                ),
            });
        }

        Ok(Self {
            config,
            cursor: None,
            last_region: None,
        })
    }

    /// Current configuration
    pub fn config(&self) -> &PanFollowConfig {
        &self.config
    }

    /// Switch display mode
    pub fn set_mode(&mut self, mode: DisplayMode) {
        self.config.mode = mode;
    }

    /// Current viewport offset, `None` before the first tracked frame
    pub fn cursor(&self) -> Option<ViewportCursor> {
        self.cursor
    }

    /// Most recent tracked region
    pub fn last_region(&self) -> Option<&TrackedRegion> {
        self.last_region.as_ref()
    }

    /// Forget the cursor and the last tracked region
    pub fn reset(&mut self) {
        self.cursor = None;
        self.last_region = None;
    }

    /// Render a frame at the current time
    pub fn render(&mut self, frame: &DecodedFrame) -> Result<RenderOutput, MediaError> {
        self.render_at(frame, Instant::now())
    }

    /// Render a frame as of `now`
    pub fn render_at(
        &mut self,
        frame: &DecodedFrame,
        now: Instant,
    ) -> Result<RenderOutput, MediaError> {
        let mut full = frame.frame.to_image()?;
        if let Some(region) = frame.region {
            self.last_region = Some(region);
        }

        let region = match self.last_region {
            Some(region) if !region.is_stale(now, self.config.stale_after) => region,
            _ => {
                trace!("No fresh tracked region, presenting full frame");
                return Ok(RenderOutput {
                    primary: full,
                    inset: None,
                });
            }
        };

        let (width, height) = full.dimensions();
        let center = if region.is_empty() {
            (width / 2, height / 2)
        } else {
            region.center()
        };
        let cursor = self.advance(width, height, center);
        let viewport =
            imageops::crop_imm(&full, cursor.x, cursor.y, width / 2, height / 2).to_image();

        let output = match self.config.mode {
            DisplayMode::Follow => RenderOutput {
                primary: viewport,
                inset: None,
            },
            DisplayMode::PictureInPicture => {
                self.annotate(&mut full, frame.region.as_ref());
                RenderOutput {
                    primary: full,
                    inset: Some(viewport),
                }
            }
            DisplayMode::Annotate => {
                self.annotate(&mut full, frame.region.as_ref());
                RenderOutput {
                    primary: full,
                    inset: None,
                }
            }
        };
        Ok(output)
    }

    /// Render a frame and draw it into the given views
    ///
    /// The sub view is required in picture-in-picture mode and hidden in the
    /// other modes.
    pub fn present(
        &mut self,
        frame: &DecodedFrame,
        main: &mut dyn FrameTarget,
        sub: Option<&mut dyn FrameTarget>,
    ) -> Result<(), MediaError> {
        if self.config.mode == DisplayMode::PictureInPicture && sub.is_none() {
            return Err(MediaError::MissingTarget {
                target: "picture-in-picture sub view".to_string(),
            });
        }

        let output = self.render(frame)?;
        main.draw_image(&output.primary);
        if let Some(sub) = sub {
            match output.inset.as_ref() {
                Some(inset) => {
                    sub.draw_image(inset);
                    sub.set_visible(true);
                }
                None => sub.set_visible(false),
            }
        }
        Ok(())
    }

    fn advance(&mut self, width: u32, height: u32, center: (u32, u32)) -> ViewportCursor {
        let max_x = width - width / 2;
        let max_y = height - height / 2;
        let target_x = target_offset(width, center.0);
        let target_y = target_offset(height, center.1);

        let speed = self.config.tracking_speed;
        let min_distance = self.config.min_distance;
        let cursor = self.cursor.get_or_insert_with(|| {
            debug!("Initializing viewport cursor for {}x{} frames", width, height);
            ViewportCursor {
                x: width / 4,
                y: height / 4,
            }
        });

        // The frame may have shrunk since the last one
        let x = i64::from(cursor.x.min(max_x));
        let y = i64::from(cursor.y.min(max_y));

        let x = x + pan_step_with(target_x - x, min_distance, speed);
        let y = y + pan_step_with(target_y - y, min_distance, speed);
        cursor.x = x.clamp(0, i64::from(max_x)) as u32;
        cursor.y = y.clamp(0, i64::from(max_y)) as u32;

        trace!(
            "Viewport cursor at ({}, {}) heading to ({}, {})",
            cursor.x,
            cursor.y,
            target_x,
            target_y
        );
        *cursor
    }

    fn annotate(&self, image: &mut RgbaImage, region: Option<&TrackedRegion>) {
        if let Some(region) = region {
            draw_outline(
                image,
                region,
                self.config.overlay_color,
                self.config.overlay_stroke,
            );
        }
    }
}

/// Offset that centers a half-size viewport on `center`, kept inside the frame
fn target_offset(extent: u32, center: u32) -> i64 {
    let extent = i64::from(extent);
    let view = extent / 2;
    let mut offset = (i64::from(center) - view / 2).max(0);
    if offset + view >= extent {
        offset -= offset + view - extent + 1;
    }
    offset.max(0)
}

fn draw_outline(image: &mut RgbaImage, region: &TrackedRegion, color: Rgba<u8>, stroke: u32) {
    let half = i64::from(stroke / 2);
    let (left, top) = (i64::from(region.x), i64::from(region.y));
    let (right, bottom) = (
        left + i64::from(region.width),
        top + i64::from(region.height),
    );

    fill_rect(image, left - half, top - half, right + half, top + half, color);
    fill_rect(image, left - half, bottom - half, right + half, bottom + half, color);
    fill_rect(image, left - half, top - half, left + half, bottom + half, color);
    fill_rect(image, right - half, top - half, right + half, bottom + half, color);
}

/// Fill an inclusive rectangle, clipped to the image
fn fill_rect(
    image: &mut RgbaImage,
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
    color: Rgba<u8>,
) {
    let max_x = i64::from(image.width()) - 1;
    let max_y = i64::from(image.height()) - 1;
    let (left, right) = (left.max(0), right.min(max_x));
    let (top, bottom) = (top.max(0), bottom.min(max_y));
    if left > right || top > bottom {
        return;
    }

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}
