//! Playback state machine
//!
//! [`PlaybackMachine`] keeps two views of playback apart: what the engine is
//! actually doing ([`PlaybackState`]) and what the caller asked for
//! ([`TargetState`]). Engine callbacks only ever move the former, except for
//! terminal conditions (error, completion) which override intent. Every
//! surface or engine event is reconciled against the target so that a
//! `start()` issued before the engine or surface was ready takes effect as soon
//! as both are.

use crate::engine::{
    EngineErrorCode, EngineEvent, EngineEventSink, EngineGeneration, EngineInfo,
    MediaEngineAdapter, MediaEngineFactory, MediaSource,
};
use crate::error::PeerViewError;
use crate::surface::{
    RenderSurface, SampleAspectRatio, SurfaceBinding, SurfaceEvent, SurfaceTracker,
    SurfaceTransition,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What the engine is actually doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Unrecoverable failure; a new source is required
    Error,
    /// No engine instance
    Idle,
    /// Waiting for the engine to prepare
    Preparing,
    /// Ready but not started
    Prepared,
    /// Presenting frames
    Playing,
    /// Paused by the caller
    Paused,
    /// End of media reached
    Completed,
}

impl PlaybackState {
    /// Whether start, pause and seek can be forwarded to the engine
    pub fn is_playback_capable(self) -> bool {
        !matches!(
            self,
            PlaybackState::Error | PlaybackState::Idle | PlaybackState::Preparing
        )
    }
}

/// What the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Intent discarded by an unrecoverable error
    Error,
    /// No intent
    Idle,
    /// Caller wants playback
    Playing,
    /// Caller wants playback paused
    Paused,
    /// Media ran to the end
    Completed,
}

/// Notifications published by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Actual or target state changed
    StateChanged {
        /// Actual state
        state: PlaybackState,
        /// Target state
        target: TargetState,
    },
    /// The engine finished preparing
    Prepared {
        /// Instance that prepared
        generation: EngineGeneration,
    },
    /// Decoded video size is known or changed
    VideoSizeChanged {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Sample aspect ratio
        sar: SampleAspectRatio,
    },
    /// Playback ran to the end
    Completed,
    /// Unhandled engine error
    Error(EngineErrorCode),
    /// A seek finished
    SeekComplete,
    /// Informational notice from the engine
    Info(EngineInfo),
    /// Subtitle text to show
    TimedText(String),
}

/// Caller supplied error handler; returning `true` marks the error as handled
pub type ErrorHandler = Box<dyn FnMut(EngineErrorCode) -> bool + Send>;

/// Playback machine configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Open the current source as soon as a surface is created
    pub open_on_surface_create: bool,
    /// Capacity of the playback event broadcast channel
    pub event_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            open_on_surface_create: true,
            event_capacity: 64,
        }
    }
}

/// Authoritative current/target state reconciler
pub struct PlaybackMachine {
    engine: MediaEngineAdapter,
    surfaces: SurfaceTracker,
    render_surface: Option<Box<dyn RenderSurface>>,
    source: Option<MediaSource>,
    state: PlaybackState,
    target: TargetState,
    seek_when_prepared: Option<u64>,
    video_width: u32,
    video_height: u32,
    video_sar: SampleAspectRatio,
    buffer_percentage: u8,
    open_on_surface_create: bool,
    error_handler: Option<ErrorHandler>,
    last_error: Option<EngineErrorCode>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl std::fmt::Debug for PlaybackMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackMachine")
            .field("state", &self.state)
            .field("target", &self.target)
            .field("source", &self.source)
            .field("engine", &self.engine)
            .field("surface", &self.surfaces.binding())
            .field("seek_when_prepared", &self.seek_when_prepared)
            .finish()
    }
}

impl PlaybackMachine {
    /// Create an idle machine; engine callbacks are delivered to `sink`
    pub fn new(
        factory: Box<dyn MediaEngineFactory>,
        sink: Arc<dyn EngineEventSink>,
        config: PlaybackConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            engine: MediaEngineAdapter::new(factory, sink),
            surfaces: SurfaceTracker::new(),
            render_surface: None,
            source: None,
            state: PlaybackState::Idle,
            target: TargetState::Idle,
            seek_when_prepared: None,
            video_width: 0,
            video_height: 0,
            video_sar: SampleAspectRatio::default(),
            buffer_percentage: 0,
            open_on_surface_create: config.open_on_surface_create,
            error_handler: None,
            last_error: None,
            events,
        }
    }

    /// Subscribe to playback notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Install the error handler
    ///
    /// The handler runs inside the machine's lock and must not call back into
    /// the controller.
    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.error_handler = handler;
    }

    /// Actual state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Target state
    pub fn target(&self) -> TargetState {
        self.target
    }

    /// Current source
    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    /// Current surface binding
    pub fn surface_binding(&self) -> Option<&SurfaceBinding> {
        self.surfaces.binding()
    }

    /// Seek position waiting for the engine to become ready
    pub fn pending_seek(&self) -> Option<u64> {
        self.seek_when_prepared
    }

    /// Runtime error the current engine instance stopped on
    pub fn last_error(&self) -> Option<PeerViewError> {
        self.last_error.map(PeerViewError::from)
    }

    /// Last known decoded video size
    pub fn video_size(&self) -> (u32, u32) {
        (self.video_width, self.video_height)
    }

    /// Whether commands can be forwarded to the engine
    pub fn is_in_playback_state(&self) -> bool {
        self.engine.is_active() && self.state.is_playback_capable()
    }

    /// Whether the engine is presenting frames
    pub fn is_playing(&self) -> bool {
        self.is_in_playback_state() && self.engine.is_playing()
    }

    /// Buffer fill level of the active engine
    pub fn buffer_percentage(&self) -> u8 {
        if self.engine.is_active() {
            self.buffer_percentage
        } else {
            0
        }
    }

    /// Media duration once the engine is ready
    pub fn duration_ms(&self) -> Option<u64> {
        if self.is_in_playback_state() {
            self.engine.duration_ms()
        } else {
            None
        }
    }

    /// Playback position once the engine is ready
    pub fn current_position_ms(&self) -> u64 {
        if self.is_in_playback_state() {
            self.engine.current_position_ms()
        } else {
            0
        }
    }

    /// Install a render target, replacing the previous one
    pub fn attach_render_surface(&mut self, mut surface: Box<dyn RenderSurface>) {
        if self.render_surface.is_some() {
            self.engine.set_display(None);
        }

        self.surfaces.attach(surface.handle());
        if self.video_width > 0 && self.video_height > 0 {
            surface.set_video_size(self.video_width, self.video_height);
        }
        if self.video_sar.is_known() {
            surface.set_sample_aspect_ratio(self.video_sar);
        }
        if let Some(rotation) = self.surfaces.binding().map(|b| b.rotation_degrees) {
            surface.set_rotation(rotation);
        }
        self.render_surface = Some(surface);
    }

    /// Remove the render target
    pub fn detach_render_surface(&mut self) -> Option<Box<dyn RenderSurface>> {
        self.engine.set_display(None);
        self.surfaces.detach();
        self.render_surface.take()
    }

    /// Replace the media source and open it when a surface is available
    ///
    /// A seek requested before the first source was set is kept; replacing an
    /// existing source discards it.
    pub fn set_source(&mut self, source: MediaSource) {
        if self.source.is_some() {
            self.seek_when_prepared = None;
        }
        info!("Media source set to {}", source.uri);
        self.source = Some(source);
        self.open_on_surface_create = true;
        self.open_video();
    }

    /// Request playback
    pub fn start(&mut self) {
        if self.is_in_playback_state() {
            self.engine.start();
            self.set_state(PlaybackState::Playing);
        }
        self.set_target(TargetState::Playing);
    }

    /// Request pause
    pub fn pause(&mut self) {
        if self.is_in_playback_state()
            && (self.state == PlaybackState::Playing || self.engine.is_playing())
        {
            self.engine.pause();
            self.set_state(PlaybackState::Paused);
        }
        self.set_target(TargetState::Paused);
    }

    /// Seek now, or once the engine is ready
    pub fn seek_to(&mut self, position_ms: u64) {
        if self.is_in_playback_state() {
            self.engine.seek(position_ms);
            self.seek_when_prepared = None;
        } else {
            debug!("Deferring seek to {}ms until prepared", position_ms);
            self.seek_when_prepared = Some(position_ms);
        }
    }

    /// Stop and forget: release the engine and clear intent
    ///
    /// The source is kept but not reopened on the next surface creation.
    pub fn stop_playback(&mut self) {
        self.seek_when_prepared = None;
        if self.engine.stop_and_release() {
            self.set_state(PlaybackState::Idle);
            self.set_target(TargetState::Idle);
            self.open_on_surface_create = false;
        }
    }

    /// Release the engine in any state
    ///
    /// With `clear_target` the source, intent and any deferred seek are
    /// forgotten as well; without it a later open resumes whatever the
    /// caller asked for.
    pub fn release(&mut self, clear_target: bool) {
        if clear_target {
            self.source = None;
            self.seek_when_prepared = None;
            self.open_on_surface_create = true;
        }

        self.engine.release();
        self.set_state(PlaybackState::Idle);
        if clear_target {
            self.set_target(TargetState::Idle);
        }
    }

    /// Apply a surface lifecycle callback
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) {
        let transition = match self.surfaces.apply(event) {
            Ok(transition) => transition,
            Err(_) => return,
        };

        match transition {
            SurfaceTransition::Bound(binding) => {
                if self.engine.is_active() {
                    self.engine.set_display(Some(binding.handle));
                } else if self.open_on_surface_create {
                    self.open_video();
                }
                if let SurfaceEvent::Changed { width, height, .. } = event {
                    self.reconcile_surface_size(width, height);
                }
            }
            SurfaceTransition::Resized { width, height } => {
                self.reconcile_surface_size(width, height);
            }
            SurfaceTransition::Unbound => {
                self.engine.set_display(None);
            }
        }
    }

    /// Apply an engine callback
    pub fn handle_engine_event(&mut self, generation: EngineGeneration, event: EngineEvent) {
        if !self.engine.is_current(generation) {
            debug!(
                "Dropping stale {} from engine generation {}",
                event.kind(),
                generation.0
            );
            return;
        }

        match event {
            EngineEvent::Prepared => self.on_prepared(generation),
            EngineEvent::VideoSizeChanged { width, height, sar } => {
                self.video_width = width;
                self.video_height = height;
                self.video_sar = sar;
                self.surfaces.set_sample_aspect_ratio(sar);
                if width != 0 && height != 0 {
                    if let Some(surface) = self.render_surface.as_mut() {
                        surface.set_video_size(width, height);
                        surface.set_sample_aspect_ratio(sar);
                    }
                }
                self.publish(PlaybackEvent::VideoSizeChanged { width, height, sar });
            }
            EngineEvent::Completed => {
                self.set_state(PlaybackState::Completed);
                self.set_target(TargetState::Completed);
                self.publish(PlaybackEvent::Completed);
            }
            EngineEvent::Error(code) => self.on_engine_error(code),
            EngineEvent::BufferingUpdate(percent) => self.buffer_percentage = percent,
            EngineEvent::SeekComplete => self.publish(PlaybackEvent::SeekComplete),
            EngineEvent::Info(info) => {
                if let EngineInfo::VideoRotationChanged(degrees) = info {
                    debug!("Video rotation changed to {}", degrees);
                    self.surfaces.set_rotation(degrees);
                    if let Some(surface) = self.render_surface.as_mut() {
                        surface.set_rotation(degrees);
                    }
                }
                self.publish(PlaybackEvent::Info(info));
            }
            EngineEvent::TimedText(text) => self.publish(PlaybackEvent::TimedText(text)),
        }
    }

    fn open_video(&mut self) {
        let handle = match (self.source.as_ref(), self.surfaces.binding()) {
            (Some(_), Some(binding)) => binding.handle,
            _ => {
                debug!("Not ready to open yet, waiting for source and surface");
                return;
            }
        };

        // Intent survives reopening: start() may already have been called.
        self.release(false);

        let Some(source) = self.source.as_ref() else {
            return;
        };
        match self.engine.open(source, Some(handle)) {
            Ok(_) => {
                self.buffer_percentage = 0;
                self.last_error = None;
                self.set_state(PlaybackState::Preparing);
            }
            Err(e) => {
                warn!("Unable to open content: {}", e);
                self.set_state(PlaybackState::Error);
                self.set_target(TargetState::Error);
                self.dispatch_error(EngineErrorCode::unknown());
            }
        }
    }

    fn on_prepared(&mut self, generation: EngineGeneration) {
        if self.state != PlaybackState::Preparing {
            debug!("Ignoring prepared callback in state {:?}", self.state);
            return;
        }

        self.set_state(PlaybackState::Prepared);
        self.publish(PlaybackEvent::Prepared { generation });

        let (width, height) = self.engine.video_size();
        self.video_width = width;
        self.video_height = height;
        let sar = self.engine.video_sample_aspect_ratio();
        if sar.is_known() {
            self.video_sar = sar;
        }

        if let Some(position) = self.seek_when_prepared {
            self.seek_to(position);
        }

        let should_start = if width != 0 && height != 0 {
            let surface_matches = self
                .surfaces
                .binding()
                .is_some_and(|b| b.matches_size(width, height));
            match self.render_surface.as_mut() {
                Some(surface) => {
                    surface.set_video_size(width, height);
                    surface.set_sample_aspect_ratio(self.video_sar);
                    let ready = !surface.should_wait_for_resize() || surface_matches;
                    if !ready {
                        debug!("Waiting for surface resize to {}x{}", width, height);
                    }
                    ready
                }
                None => false,
            }
        } else {
            // Size unknown yet; it may be reported later.
            true
        };

        if should_start && self.target == TargetState::Playing {
            self.start();
        }
    }

    fn reconcile_surface_size(&mut self, width: u32, height: u32) {
        let waits = self
            .render_surface
            .as_ref()
            .is_some_and(|s| s.should_wait_for_resize());
        let has_valid_size = !waits || (self.video_width == width && self.video_height == height);

        if self.target == TargetState::Playing
            && has_valid_size
            && self.is_in_playback_state()
            && self.state != PlaybackState::Playing
        {
            if let Some(position) = self.seek_when_prepared {
                self.seek_to(position);
            }
            debug!("Surface reached {}x{}, starting deferred playback", width, height);
            self.start();
        }
    }

    fn on_engine_error(&mut self, code: EngineErrorCode) {
        warn!("{}", PeerViewError::from(code));
        self.last_error = Some(code);
        self.set_state(PlaybackState::Error);
        self.set_target(TargetState::Error);
        self.dispatch_error(code);
    }

    fn dispatch_error(&mut self, code: EngineErrorCode) {
        let handled = self.error_handler.as_mut().is_some_and(|handler| handler(code));
        if !handled {
            self.publish(PlaybackEvent::Error(code));
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("Playback state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.publish_state();
        }
    }

    fn set_target(&mut self, target: TargetState) {
        if self.target != target {
            debug!("Playback target {:?} -> {:?}", self.target, target);
            self.target = target;
            self.publish_state();
        }
    }

    fn publish_state(&self) {
        self.publish(PlaybackEvent::StateChanged {
            state: self.state,
            target: self.target,
        });
    }

    fn publish(&self, event: PlaybackEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
