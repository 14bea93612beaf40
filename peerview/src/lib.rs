//! # PeerView - Video View for Engine Playback and Peer Sessions
//!
//! PeerView keeps three independently evolving asynchronous subsystems
//! consistent: the render surface lifecycle, an opaque media engine, and a
//! peer connection negotiated over a signaling channel.
//!
//! ## Key Features
//!
//! - **Playback reconciliation**: current and requested playback state are
//!   reconciled against surface and engine callbacks, whatever their order
//! - **Stale callback rejection**: callbacks for replaced surfaces or engine
//!   instances are detected and dropped
//! - **Pan/follow rendering**: a tracked-object box is smoothed into a stable
//!   viewport crop
//! - **Peer sessions**: offer/answer and ICE exchange to a connected or
//!   failed terminal state, with a single-use gate for the caller
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use peerview::PeerView;
//!
//! let peerview = PeerView::init()?;
//! let view = peerview.video_view(Box::new(MyEngineFactory)).build()?;
//!
//! view.attach_render_surface(Box::new(my_surface));
//! view.set_video_path("rtsp://camera.local/stream");
//! view.start();
//!
//! // Platform surface callbacks
//! let callbacks = view.surface_callbacks();
//! callbacks.on_created(handle, 1280, 720);
//!
//! let mut events = view.events();
//! while let Some(event) = peerview.block_on(events.next()) {
//!     println!("View event: {}", event.event_type());
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use peerview_core::{
    EngineCallbacks, EngineErrorCode, EngineGeneration, EngineInfo, EngineOpenError,
    EngineOpenFailure, MediaEngine, MediaEngineFactory, MediaSource, PeerViewError,
    PlaybackConfig, PlaybackEvent, PlaybackState, RenderSurface, SampleAspectRatio,
    SurfaceBinding, SurfaceCallbacks, SurfaceHandle, TargetState,
};

pub use peerview_media::{
    DecodedFrame, DisplayMode, FrameTarget, MediaError, PanFollowConfig, ProxyVideoSink,
    TrackedRegion, VideoFrame, VideoSink,
};

pub use peerview_signaling::{
    CommandChannelClient, CommandChannelConfig, CommandTransport, ConnectionHandle,
    ConnectionOutcome, IceCandidate, IceGatheringState, IceServer, PeerConnectionClient,
    PeerConnectionEvents, PeerConnectionParameters, RelayCredentials, RoomConnectionParameters,
    SdpType, SessionConfig, SessionDescription, SessionEvent, SessionState, SignalingChannel,
    SignalingEvents, SignalingParameters, SignalingRole, StatsReport, VideoCapturer,
};

#[cfg(feature = "diagnostics")]
pub use peerview_diagnostics::{DebugLogger, Milestone, SessionTimeline, TimelineReport};

// Public API modules
pub mod config;
pub mod event;
pub mod view;

// Re-export main API types
pub use config::{GlobalConfig, PlayerConfig};
pub use event::{Event, EventFilter, EventStream, FilteredEventStream};
pub use view::{SessionRequest, VideoView, VideoViewBuilder};

/// Main entry point for PeerView
#[derive(Debug, Clone)]
pub struct PeerView {
    inner: std::sync::Arc<PeerViewInner>,
}

#[derive(Debug)]
struct PeerViewInner {
    runtime: tokio::runtime::Runtime,
    config: GlobalConfig,
}

impl PeerView {
    /// Initialize PeerView with default settings
    pub fn init() -> Result<Self, PeerViewError> {
        Self::init_with(GlobalConfig::default())
    }

    /// Initialize with custom global configuration
    pub fn init_with(config: GlobalConfig) -> Result<Self, PeerViewError> {
        if config.debug_logging {
            #[cfg(feature = "diagnostics")]
            DebugLogger::init_logging(&config.log_filter)?;
            #[cfg(not(feature = "diagnostics"))]
            tracing::warn!("Debug logging requested without the diagnostics feature");
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("peerview");
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads.max(1));
        }
        let runtime = builder.build().map_err(|e| PeerViewError::Initialization {
            reason: format!("Failed to create async runtime: {}", e),
        })?;

        tracing::debug!("PeerView initialized");
        Ok(Self {
            inner: std::sync::Arc::new(PeerViewInner { runtime, config }),
        })
    }

    /// Global configuration
    pub fn config(&self) -> &GlobalConfig {
        &self.inner.config
    }

    /// Handle to the runtime callbacks and sessions run on
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.inner.runtime.handle().clone()
    }

    /// Run a future to completion on the PeerView runtime
    ///
    /// Must not be called from within an async context.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.inner.runtime.block_on(future)
    }

    /// Create a video view builder driving engines made by `factory`
    pub fn video_view(&self, factory: Box<dyn MediaEngineFactory>) -> VideoViewBuilder {
        VideoViewBuilder::new(self, factory)
    }
}
