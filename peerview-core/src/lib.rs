//! # PeerView Core
//!
//! Render surface tracking, the media engine adapter and the playback state
//! machine that reconciles what the caller asked for with what the engine and
//! the surface are actually able to do.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod engine;
pub mod error;
pub mod playback;
pub mod surface;

// Re-export main types
pub use controller::{PlaybackController, SurfaceCallbacks};
pub use engine::{
    EngineCallbacks, EngineErrorCode, EngineEvent, EngineEventSink, EngineGeneration, EngineInfo,
    EngineOpenError, MediaEngine, MediaEngineAdapter, MediaEngineFactory, MediaSource,
};
pub use error::{EngineOpenFailure, PeerViewError};
pub use playback::{
    ErrorHandler, PlaybackConfig, PlaybackEvent, PlaybackMachine, PlaybackState, TargetState,
};
pub use surface::{
    RenderSurface, SampleAspectRatio, SurfaceBinding, SurfaceEvent, SurfaceHandle,
    SurfaceTracker, SurfaceTransition,
};
