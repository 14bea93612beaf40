//! Media engine adapter
//!
//! The native decoder is opaque: it is driven with a handful of commands and
//! reports back through callbacks on its own threads. This module describes
//! that collaborator ([`MediaEngine`]), normalizes its callbacks into
//! [`EngineEvent`]s tagged with an [`EngineGeneration`], and owns at most one
//! engine instance at a time ([`MediaEngineAdapter`]).

use crate::error::{EngineOpenFailure, PeerViewError};
use crate::surface::{SampleAspectRatio, SurfaceHandle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What the engine should play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    /// Location of the media
    pub uri: String,
    /// Extra request headers for network sources
    pub headers: Option<BTreeMap<String, String>>,
    /// Local copy to fall back to when the uri is unreachable
    pub local_fallback: Option<PathBuf>,
}

impl MediaSource {
    /// Source for a uri or path
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: None,
            local_fallback: None,
        }
    }

    /// Attach request headers
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Attach a local fallback file
    pub fn with_local_fallback(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_fallback = Some(path.into());
        self
    }

    /// Uri scheme, if the uri has one
    pub fn scheme(&self) -> Option<&str> {
        self.uri.split_once("://").map(|(scheme, _)| scheme)
    }

    /// Headers rendered as the `Key: value\r\n` block engines expect
    pub fn header_block(&self) -> Option<String> {
        let headers = self.headers.as_ref()?;
        if headers.is_empty() {
            return None;
        }
        Some(
            headers
                .iter()
                .map(|(key, value)| format!("{}: {}\r\n", key, value))
                .collect(),
        )
    }
}

/// Identifies one engine instance; bumped on every open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineGeneration(pub u64);

/// Error pair reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineErrorCode {
    /// Framework level code
    pub code: i32,
    /// Implementation specific code
    pub subcode: i32,
}

impl EngineErrorCode {
    /// Framework code for errors without a more specific category
    pub const MEDIA_ERROR_UNKNOWN: i32 = 1;

    /// Code used when opening a source fails before the engine reports anything
    pub fn unknown() -> Self {
        Self {
            code: Self::MEDIA_ERROR_UNKNOWN,
            subcode: 0,
        }
    }
}

impl From<EngineErrorCode> for PeerViewError {
    fn from(code: EngineErrorCode) -> Self {
        PeerViewError::EngineRuntime {
            code: code.code,
            subcode: code.subcode,
        }
    }
}

/// Informational notices from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineInfo {
    /// First video frame was rendered
    VideoRenderingStart,
    /// First audio sample was rendered
    AudioRenderingStart,
    /// Video decoding cannot keep up
    VideoTrackLagging,
    /// Playback paused to fill the buffer
    BufferingStart,
    /// Buffer refilled
    BufferingEnd,
    /// Measured network bandwidth
    NetworkBandwidth(i32),
    /// Source is badly interleaved
    BadInterleaving,
    /// Source does not support seeking
    NotSeekable,
    /// Metadata became available
    MetadataUpdate,
    /// Subtitle track cannot be shown
    UnsupportedSubtitle,
    /// Subtitle decoding took too long
    SubtitleTimedOut,
    /// Video must be rotated by the given degrees
    VideoRotationChanged(u32),
    /// Code this adapter does not know
    Other {
        /// Raw info code
        what: i32,
        /// Raw extra value
        extra: i32,
    },
}

impl EngineInfo {
    /// Map a raw `(what, extra)` info pair
    pub fn from_raw(what: i32, extra: i32) -> Self {
        match what {
            3 => EngineInfo::VideoRenderingStart,
            700 => EngineInfo::VideoTrackLagging,
            701 => EngineInfo::BufferingStart,
            702 => EngineInfo::BufferingEnd,
            703 => EngineInfo::NetworkBandwidth(extra),
            800 => EngineInfo::BadInterleaving,
            801 => EngineInfo::NotSeekable,
            802 => EngineInfo::MetadataUpdate,
            901 => EngineInfo::UnsupportedSubtitle,
            902 => EngineInfo::SubtitleTimedOut,
            10001 => EngineInfo::VideoRotationChanged(extra.rem_euclid(360) as u32),
            10002 => EngineInfo::AudioRenderingStart,
            _ => EngineInfo::Other { what, extra },
        }
    }
}

/// Normalized engine callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The source is ready to play
    Prepared,
    /// Decoded video size is known or changed
    VideoSizeChanged {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Sample aspect ratio
        sar: SampleAspectRatio,
    },
    /// End of media reached
    Completed,
    /// The engine failed
    Error(EngineErrorCode),
    /// Buffer fill level, 0 to 100
    BufferingUpdate(u8),
    /// A seek finished
    SeekComplete,
    /// Informational notice
    Info(EngineInfo),
    /// Subtitle text to show
    TimedText(String),
}

impl EngineEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Prepared => "prepared",
            EngineEvent::VideoSizeChanged { .. } => "video_size_changed",
            EngineEvent::Completed => "completed",
            EngineEvent::Error(_) => "error",
            EngineEvent::BufferingUpdate(_) => "buffering_update",
            EngineEvent::SeekComplete => "seek_complete",
            EngineEvent::Info(_) => "info",
            EngineEvent::TimedText(_) => "timed_text",
        }
    }
}

/// Receiver of engine callbacks; must not block
pub trait EngineEventSink: Send + Sync {
    /// Deliver one event from the given engine instance
    fn deliver(&self, generation: EngineGeneration, event: EngineEvent);
}

/// Callback surface handed to one engine instance
///
/// Engines call these from any thread. Everything is stamped with the
/// generation of the instance so late callbacks from a released engine are
/// recognized and ignored.
#[derive(Clone)]
pub struct EngineCallbacks {
    generation: EngineGeneration,
    sink: Arc<dyn EngineEventSink>,
}

impl std::fmt::Debug for EngineCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCallbacks")
            .field("generation", &self.generation)
            .finish()
    }
}

impl EngineCallbacks {
    /// Create callbacks for an engine instance
    pub fn new(generation: EngineGeneration, sink: Arc<dyn EngineEventSink>) -> Self {
        Self { generation, sink }
    }

    /// Generation of the instance these callbacks belong to
    pub fn generation(&self) -> EngineGeneration {
        self.generation
    }

    /// Source prepared
    pub fn on_prepared(&self) {
        self.emit(EngineEvent::Prepared);
    }

    /// Video size known or changed
    pub fn on_video_size_changed(&self, width: u32, height: u32, sar_num: u32, sar_den: u32) {
        self.emit(EngineEvent::VideoSizeChanged {
            width,
            height,
            sar: SampleAspectRatio::new(sar_num, sar_den),
        });
    }

    /// Playback reached the end
    pub fn on_completion(&self) {
        self.emit(EngineEvent::Completed);
    }

    /// Engine failure
    pub fn on_error(&self, code: i32, subcode: i32) {
        self.emit(EngineEvent::Error(EngineErrorCode { code, subcode }));
    }

    /// Buffer fill percentage; out of range values are clamped
    pub fn on_buffering_update(&self, percent: i32) {
        self.emit(EngineEvent::BufferingUpdate(percent.clamp(0, 100) as u8));
    }

    /// Seek finished
    pub fn on_seek_complete(&self) {
        self.emit(EngineEvent::SeekComplete);
    }

    /// Raw info notice
    pub fn on_info(&self, what: i32, extra: i32) {
        self.emit(EngineEvent::Info(EngineInfo::from_raw(what, extra)));
    }

    /// Subtitle text
    pub fn on_timed_text(&self, text: impl Into<String>) {
        self.emit(EngineEvent::TimedText(text.into()));
    }

    fn emit(&self, event: EngineEvent) {
        self.sink.deliver(self.generation, event);
    }
}

/// Error returned by the engine when it cannot open a source
#[derive(Error, Debug, Clone)]
#[error("{kind}: {reason}")]
pub struct EngineOpenError {
    /// Failure category
    pub kind: EngineOpenFailure,
    /// Engine supplied detail
    pub reason: String,
}

impl EngineOpenError {
    /// I/O failure
    pub fn io(reason: impl Into<String>) -> Self {
        Self {
            kind: EngineOpenFailure::IoFailure,
            reason: reason.into(),
        }
    }

    /// Rejected argument
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self {
            kind: EngineOpenFailure::InvalidArgument,
            reason: reason.into(),
        }
    }
}

/// The opaque native player
pub trait MediaEngine: Send {
    /// Point the engine at a source
    fn set_data_source(&mut self, source: &MediaSource) -> Result<(), EngineOpenError>;

    /// Bind or unbind the render target
    fn set_display(&mut self, surface: Option<SurfaceHandle>);

    /// Start preparing; completion is reported through [`EngineCallbacks::on_prepared`]
    fn prepare_async(&mut self) -> Result<(), EngineOpenError>;

    /// Start or resume playback
    fn start(&mut self);

    /// Pause playback
    fn pause(&mut self);

    /// Seek to a position in milliseconds
    fn seek_to(&mut self, position_ms: u64);

    /// Stop playback
    fn stop(&mut self);

    /// Return to the uninitialized state
    fn reset(&mut self);

    /// Free native resources; no other call may follow
    fn release(&mut self);

    /// Whether frames are currently being presented
    fn is_playing(&self) -> bool;

    /// Media duration, if known
    fn duration_ms(&self) -> Option<u64>;

    /// Current playback position
    fn current_position_ms(&self) -> u64;

    /// Decoded video width, 0 if unknown
    fn video_width(&self) -> u32;

    /// Decoded video height, 0 if unknown
    fn video_height(&self) -> u32;

    /// Decoded video sample aspect ratio
    fn video_sample_aspect_ratio(&self) -> SampleAspectRatio;
}

/// Creates engine instances
pub trait MediaEngineFactory: Send {
    /// Create a fresh engine that reports through `callbacks`
    fn create(&mut self, callbacks: EngineCallbacks) -> Result<Box<dyn MediaEngine>, EngineOpenError>;
}

/// Owns at most one engine instance and stamps its callbacks
pub struct MediaEngineAdapter {
    factory: Box<dyn MediaEngineFactory>,
    sink: Arc<dyn EngineEventSink>,
    engine: Option<Box<dyn MediaEngine>>,
    generation: EngineGeneration,
}

impl std::fmt::Debug for MediaEngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEngineAdapter")
            .field("active", &self.engine.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

impl MediaEngineAdapter {
    /// Create an adapter with no active engine
    pub fn new(factory: Box<dyn MediaEngineFactory>, sink: Arc<dyn EngineEventSink>) -> Self {
        Self {
            factory,
            sink,
            engine: None,
            generation: EngineGeneration(0),
        }
    }

    /// Whether an engine instance exists
    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    /// Generation of the active instance
    pub fn current_generation(&self) -> Option<EngineGeneration> {
        self.engine.as_ref().map(|_| self.generation)
    }

    /// Whether a callback stamped with `generation` belongs to the active instance
    pub fn is_current(&self, generation: EngineGeneration) -> bool {
        self.engine.is_some() && self.generation == generation
    }

    /// Create an engine for `source`, bind `surface` and start preparing
    ///
    /// Calling this while an instance is active is a caller error. When the
    /// source is rejected the failed instance stays active so that a later
    /// [`release`](Self::release) tears it down.
    pub fn open(
        &mut self,
        source: &MediaSource,
        surface: Option<SurfaceHandle>,
    ) -> Result<EngineGeneration, PeerViewError> {
        if self.engine.is_some() {
            return Err(PeerViewError::EngineAlreadyActive {
                generation: self.generation.0,
            });
        }

        let generation = EngineGeneration(self.generation.0 + 1);
        self.generation = generation;
        let open_error = |e: EngineOpenError| PeerViewError::EngineOpen {
            uri: source.uri.clone(),
            kind: e.kind,
            reason: e.reason,
        };

        let callbacks = EngineCallbacks::new(generation, self.sink.clone());
        let engine = self.factory.create(callbacks).map_err(open_error)?;
        let engine = self.engine.insert(engine);

        engine.set_data_source(source).map_err(open_error)?;
        engine.set_display(surface);
        engine.prepare_async().map_err(open_error)?;

        info!("Opened {} (engine generation {})", source.uri, generation.0);
        Ok(generation)
    }

    /// Start or resume
    pub fn start(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.start();
        }
    }

    /// Pause
    pub fn pause(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.pause();
        }
    }

    /// Seek to `position_ms`
    pub fn seek(&mut self, position_ms: u64) {
        if let Some(engine) = self.engine.as_mut() {
            engine.seek_to(position_ms);
        }
    }

    /// Stop playback without releasing the instance
    pub fn stop(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
    }

    /// Bind or unbind the render target of the active instance
    pub fn set_display(&mut self, surface: Option<SurfaceHandle>) {
        if let Some(engine) = self.engine.as_mut() {
            engine.set_display(surface);
        }
    }

    /// Reset and free the active instance; returns whether one existed
    ///
    /// Safe to call any number of times.
    pub fn release(&mut self) -> bool {
        match self.engine.take() {
            Some(mut engine) => {
                engine.reset();
                engine.release();
                debug!("Released engine generation {}", self.generation.0);
                true
            }
            None => false,
        }
    }

    /// Stop then free the active instance; returns whether one existed
    pub fn stop_and_release(&mut self) -> bool {
        match self.engine.take() {
            Some(mut engine) => {
                engine.stop();
                engine.release();
                debug!("Stopped engine generation {}", self.generation.0);
                true
            }
            None => false,
        }
    }

    /// Whether the active instance is presenting frames
    pub fn is_playing(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_playing())
    }

    /// Duration of the current source
    pub fn duration_ms(&self) -> Option<u64> {
        self.engine.as_ref().and_then(|e| e.duration_ms())
    }

    /// Current position, 0 without an engine
    pub fn current_position_ms(&self) -> u64 {
        self.engine.as_ref().map_or(0, |e| e.current_position_ms())
    }

    /// Decoded video size, `(0, 0)` when unknown
    pub fn video_size(&self) -> (u32, u32) {
        self.engine
            .as_ref()
            .map_or((0, 0), |e| (e.video_width(), e.video_height()))
    }

    /// Decoded video sample aspect ratio
    pub fn video_sample_aspect_ratio(&self) -> SampleAspectRatio {
        self.engine
            .as_ref()
            .map(|e| e.video_sample_aspect_ratio())
            .unwrap_or_default()
    }
}

impl Drop for MediaEngineAdapter {
    fn drop(&mut self) {
        if self.release() {
            warn!("Media engine adapter dropped with an active engine");
        }
    }
}
