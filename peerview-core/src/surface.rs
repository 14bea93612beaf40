//! Render surface lifecycle tracking
//!
//! The platform creates, resizes and destroys the render target on its own
//! schedule. [`SurfaceTracker`] keeps the most recent valid binding and rejects
//! callbacks that reference a render target other than the attached one; those
//! come from a surface that was replaced while its callback was in flight.

use crate::error::PeerViewError;
use tracing::{debug, warn};

/// Opaque identity of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub u64);

impl std::fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Pixel aspect ratio reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleAspectRatio {
    /// Numerator
    pub num: u32,
    /// Denominator
    pub den: u32,
}

impl SampleAspectRatio {
    /// Create a new ratio
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whether both terms are known
    pub fn is_known(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

/// The currently valid render target and what is known about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceBinding {
    /// Render target identity
    pub handle: SurfaceHandle,
    /// Last reported width in pixels
    pub width: u32,
    /// Last reported height in pixels
    pub height: u32,
    /// Rotation applied to the video, in degrees
    pub rotation_degrees: u32,
    /// Sample aspect ratio applied to the video
    pub sample_aspect_ratio: SampleAspectRatio,
}

impl SurfaceBinding {
    /// Whether the surface already has exactly the given size
    pub fn matches_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// Lifecycle callback delivered by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The render target became usable
    Created {
        /// Render target identity
        handle: SurfaceHandle,
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// The render target changed size
    Changed {
        /// Render target identity
        handle: SurfaceHandle,
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// The render target is gone and must no longer be referenced
    Destroyed {
        /// Render target identity
        handle: SurfaceHandle,
    },
}

impl SurfaceEvent {
    /// Handle the event refers to
    pub fn handle(&self) -> SurfaceHandle {
        match self {
            SurfaceEvent::Created { handle, .. }
            | SurfaceEvent::Changed { handle, .. }
            | SurfaceEvent::Destroyed { handle } => *handle,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SurfaceEvent::Created { .. } => "created",
            SurfaceEvent::Changed { .. } => "changed",
            SurfaceEvent::Destroyed { .. } => "destroyed",
        }
    }
}

/// Result of applying an accepted surface event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceTransition {
    /// A binding became available
    Bound(SurfaceBinding),
    /// The existing binding changed size
    Resized {
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
    /// The binding was dropped
    Unbound,
}

/// Render target capability consumed by the playback state machine
pub trait RenderSurface: Send {
    /// Identity used to match lifecycle callbacks
    fn handle(&self) -> SurfaceHandle;

    /// Inform the surface of the decoded video size
    fn set_video_size(&mut self, width: u32, height: u32);

    /// Inform the surface of the video sample aspect ratio
    fn set_sample_aspect_ratio(&mut self, sar: SampleAspectRatio);

    /// Rotate the presented video
    fn set_rotation(&mut self, degrees: u32);

    /// Whether playback must wait until the surface is resized to the video size
    fn should_wait_for_resize(&self) -> bool;
}

/// Tracks the attached render target and its most recent binding
#[derive(Debug, Default)]
pub struct SurfaceTracker {
    attached: Option<SurfaceHandle>,
    binding: Option<SurfaceBinding>,
    rotation_degrees: u32,
    sample_aspect_ratio: SampleAspectRatio,
}

impl SurfaceTracker {
    /// Create a tracker with nothing attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new render target, dropping any binding to the previous one
    pub fn attach(&mut self, handle: SurfaceHandle) -> Option<SurfaceBinding> {
        debug!("Attaching render target {}", handle);
        self.attached = Some(handle);
        self.binding.take()
    }

    /// Detach the render target entirely
    pub fn detach(&mut self) -> Option<SurfaceBinding> {
        self.attached = None;
        self.binding.take()
    }

    /// Currently attached render target
    pub fn attached(&self) -> Option<SurfaceHandle> {
        self.attached
    }

    /// Current binding, present only between created and destroyed
    pub fn binding(&self) -> Option<&SurfaceBinding> {
        self.binding.as_ref()
    }

    /// Whether a valid binding exists
    pub fn is_ready(&self) -> bool {
        self.binding.is_some()
    }

    /// Record the rotation the engine asked for
    pub fn set_rotation(&mut self, degrees: u32) {
        self.rotation_degrees = degrees;
        if let Some(binding) = self.binding.as_mut() {
            binding.rotation_degrees = degrees;
        }
    }

    /// Record the sample aspect ratio the engine reported
    pub fn set_sample_aspect_ratio(&mut self, sar: SampleAspectRatio) {
        self.sample_aspect_ratio = sar;
        if let Some(binding) = self.binding.as_mut() {
            binding.sample_aspect_ratio = sar;
        }
    }

    /// Apply a lifecycle callback
    ///
    /// Callbacks for a render target other than the attached one are rejected
    /// with [`PeerViewError::SurfaceMismatch`] and leave the tracker untouched.
    pub fn apply(&mut self, event: SurfaceEvent) -> Result<SurfaceTransition, PeerViewError> {
        let handle = event.handle();
        if self.attached != Some(handle) {
            warn!(
                "Dropping {} callback for {}: unmatched render target",
                event.kind(),
                handle
            );
            return Err(PeerViewError::SurfaceMismatch {
                expected: self.attached.map(|h| h.0),
                actual: handle.0,
            });
        }

        let transition = match event {
            SurfaceEvent::Created { width, height, .. } => {
                let binding = self.new_binding(handle, width, height);
                self.binding = Some(binding.clone());
                SurfaceTransition::Bound(binding)
            }
            SurfaceEvent::Changed { width, height, .. } => match self.binding.as_mut() {
                Some(binding) => {
                    binding.width = width;
                    binding.height = height;
                    SurfaceTransition::Resized { width, height }
                }
                None => {
                    debug!("{} changed before created, binding it", handle);
                    let binding = self.new_binding(handle, width, height);
                    self.binding = Some(binding.clone());
                    SurfaceTransition::Bound(binding)
                }
            },
            SurfaceEvent::Destroyed { .. } => {
                self.binding = None;
                SurfaceTransition::Unbound
            }
        };

        Ok(transition)
    }

    fn new_binding(&self, handle: SurfaceHandle, width: u32, height: u32) -> SurfaceBinding {
        SurfaceBinding {
            handle,
            width,
            height,
            rotation_degrees: self.rotation_degrees,
            sample_aspect_ratio: self.sample_aspect_ratio,
        }
    }
}
