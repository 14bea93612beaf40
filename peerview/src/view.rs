//! Video view API
//!
//! A [`VideoView`] binds one playback state machine, one pan/follow renderer
//! and at most one live peer session to a render surface.

use crate::event::{forward, EventHub};
use crate::{Event, EventStream, PeerView, PlayerConfig};
use parking_lot::Mutex;
use peerview_core::{
    EngineErrorCode, MediaEngineFactory, MediaSource, PeerViewError, PlaybackController,
    PlaybackState, RenderSurface, SurfaceCallbacks, TargetState,
};
use peerview_media::{
    DecodedFrame, DisplayMode, FrameTarget, PanFollowConfig, PanFollowRenderer, VideoSink,
};
use peerview_signaling::{
    ConnectionHandle, ConnectionOutcome, GateWaiter, PeerConnectionClient, PeerSessionController,
    RoomConnectionParameters, SessionConfig, SessionState, SignalingChannel, VideoCapturer,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(feature = "diagnostics")]
use peerview_diagnostics::{SessionTimeline, TimelineReport};

/// Fluent builder for a video view
pub struct VideoViewBuilder {
    peerview: PeerView,
    factory: Box<dyn MediaEngineFactory>,
    config: PlayerConfig,
}

impl std::fmt::Debug for VideoViewBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoViewBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl VideoViewBuilder {
    pub(crate) fn new(peerview: &PeerView, factory: Box<dyn MediaEngineFactory>) -> Self {
        Self {
            peerview: peerview.clone(),
            factory,
            config: PlayerConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Open the source as soon as a surface appears (default on)
    pub fn open_on_surface_create(mut self, enabled: bool) -> Self {
        self.config.playback.open_on_surface_create = enabled;
        self
    }

    /// Initial display mode
    pub fn display_mode(mut self, mode: DisplayMode) -> Self {
        self.config.pan_follow.mode = mode;
        self
    }

    /// Pan/follow renderer settings
    pub fn pan_follow(mut self, pan_follow: PanFollowConfig) -> Self {
        self.config.pan_follow = pan_follow;
        self
    }

    /// Peer session settings
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Cap the video send bitrate of peer sessions
    pub fn video_max_bitrate(mut self, kbps: u32) -> Self {
        self.config.session.peer.video_max_bitrate_kbps = Some(kbps);
        self
    }

    /// Abandon session starts that take longer than `timeout`
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Build the view
    pub fn build(self) -> Result<VideoView, PeerViewError> {
        let renderer = PanFollowRenderer::new(self.config.pan_follow.clone()).map_err(|e| {
            PeerViewError::InvalidConfiguration {
                reason: format!("pan_follow: {}", e),
            }
        })?;

        let runtime = self.peerview.handle();
        let playback =
            PlaybackController::spawn(self.factory, self.config.playback.clone(), &runtime);
        let hub = Arc::new(EventHub::default());
        let playback_forwarder = forward(&runtime, playback.subscribe(), hub.clone(), Event::Playback);

        info!("Video view created in {:?} mode", self.config.display_mode());
        Ok(VideoView {
            runtime,
            config: self.config,
            playback,
            renderer: Mutex::new(renderer),
            session: Mutex::new(SessionSlot::default()),
            remote_video: Mutex::new(None),
            hub,
            playback_forwarder,
            peerview: self.peerview,
        })
    }
}

/// What a peer session start needs
pub struct SessionRequest {
    /// Signaling channel to the remote side
    pub channel: Box<dyn SignalingChannel>,
    /// Peer connection library
    pub peer: Box<dyn PeerConnectionClient>,
    /// Room to join
    pub room: RoomConnectionParameters,
    /// Local video source, if any
    pub capturer: Option<Box<dyn VideoCapturer>>,
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRequest")
            .field("room", &self.room)
            .field("capturer", &self.capturer.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl SessionRequest {
    /// Create a request without a local video source
    pub fn new(
        channel: Box<dyn SignalingChannel>,
        peer: Box<dyn PeerConnectionClient>,
        room: RoomConnectionParameters,
    ) -> Self {
        Self {
            channel,
            peer,
            room,
            capturer: None,
        }
    }

    /// Send local video from `capturer`
    pub fn with_capturer(mut self, capturer: Box<dyn VideoCapturer>) -> Self {
        self.capturer = Some(capturer);
        self
    }
}

#[derive(Default)]
struct SessionSlot {
    controller: Option<PeerSessionController>,
    forwarder: Option<JoinHandle<()>>,
    #[cfg(feature = "diagnostics")]
    timeline: Option<Arc<Mutex<SessionTimeline>>>,
}

/// Video view bound to a media engine and, optionally, a peer session
pub struct VideoView {
    runtime: Handle,
    config: PlayerConfig,
    playback: PlaybackController,
    renderer: Mutex<PanFollowRenderer>,
    session: Mutex<SessionSlot>,
    remote_video: Mutex<Option<Arc<dyn VideoSink>>>,
    hub: Arc<EventHub>,
    playback_forwarder: JoinHandle<()>,
    // Owns the runtime; dropped after everything that runs on it
    peerview: PeerView,
}

impl std::fmt::Debug for VideoView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoView")
            .field("playback", &self.playback)
            .field("session_state", &self.session_state())
            .finish()
    }
}

impl VideoView {
    /// Play the file or URI at `path`
    pub fn set_video_path(&self, path: &str) {
        self.set_source(MediaSource::new(path));
    }

    /// Play `uri`, sending `headers` with the request
    pub fn set_video_uri(&self, uri: &str, headers: BTreeMap<String, String>) {
        self.set_source(MediaSource::new(uri).with_headers(headers));
    }

    /// Play `source`, replacing the current one
    pub fn set_source(&self, source: MediaSource) {
        self.playback.set_source(source);
    }

    /// Start or resume playback
    pub fn start(&self) {
        self.playback.start();
    }

    /// Pause playback
    pub fn pause(&self) {
        self.playback.pause();
    }

    /// Seek to `position_ms`
    pub fn seek_to(&self, position_ms: u64) {
        self.playback.seek_to(position_ms);
    }

    /// Stop playback and forget the intent to play
    pub fn stop_playback(&self) {
        self.playback.stop_playback();
    }

    /// Release the engine; `clear_target` also forgets the intent to play
    pub fn release(&self, clear_target: bool) {
        self.playback.release(clear_target);
    }

    /// Callbacks to hand to the platform surface
    pub fn surface_callbacks(&self) -> SurfaceCallbacks {
        self.playback.surface_callbacks()
    }

    /// Install the render surface the engine draws into
    pub fn attach_render_surface(&self, surface: Box<dyn RenderSurface>) {
        self.playback.attach_render_surface(surface);
    }

    /// Remove the render surface
    pub fn detach_render_surface(&self) -> Option<Box<dyn RenderSurface>> {
        self.playback.detach_render_surface()
    }

    /// Install an engine error handler; returning `true` suppresses the
    /// [`Event::Playback`] error notification
    pub fn on_error<F>(&self, handler: F)
    where
        F: FnMut(EngineErrorCode) -> bool + Send + 'static,
    {
        self.playback.on_error(handler);
    }

    /// Actual playback state
    pub fn state(&self) -> PlaybackState {
        self.playback.state()
    }

    /// Requested playback state
    pub fn target(&self) -> TargetState {
        self.playback.target()
    }

    /// Whether the engine is playing
    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    /// Duration of the source
    pub fn duration_ms(&self) -> Option<u64> {
        self.playback.duration_ms()
    }

    /// Playback position
    pub fn current_position_ms(&self) -> u64 {
        self.playback.current_position_ms()
    }

    /// Engine runtime error playback stopped on, until a new source opens
    pub fn last_error(&self) -> Option<PeerViewError> {
        self.playback.last_error()
    }

    /// Buffered share of the source
    pub fn buffer_percentage(&self) -> u8 {
        self.playback.buffer_percentage()
    }

    /// Switch the pan/follow display mode
    pub fn set_display_mode(&self, mode: DisplayMode) {
        self.renderer.lock().set_mode(mode);
    }

    /// Render a decoded frame into the main view and, in picture-in-picture
    /// mode, the sub view
    pub fn draw(
        &self,
        frame: &DecodedFrame,
        main: &mut dyn FrameTarget,
        sub: Option<&mut dyn FrameTarget>,
    ) -> Result<(), PeerViewError> {
        self.renderer
            .lock()
            .present(frame, main, sub)
            .map_err(|e| PeerViewError::InvalidData {
                reason: format!("{} ({})", e, e.error_code()),
            })
    }

    /// Where remote peer video is delivered, for this and later sessions
    pub fn set_remote_video(&self, sink: Option<Arc<dyn VideoSink>>) {
        *self.remote_video.lock() = sink.clone();
        if let Some(controller) = self.session.lock().controller.as_ref() {
            controller.remote_sink().set_target(sink);
        }
    }

    /// Subscribe to playback and session events
    pub fn events(&self) -> EventStream {
        self.hub.subscribe()
    }

    /// Start a peer session and wait until it is connected or failed
    pub async fn start_session(
        &self,
        request: SessionRequest,
    ) -> Result<ConnectionOutcome, PeerViewError> {
        let waiter = self.launch_session(request)?;
        match waiter.wait_timeout(self.config.session_timeout).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.stop_session();
                Err(e)
            }
        }
    }

    /// Blocking form of [`VideoView::start_session`]
    ///
    /// Must be called from a thread outside the PeerView runtime; the
    /// callbacks that release the caller are delivered on that runtime.
    pub fn start_session_blocking(
        &self,
        request: SessionRequest,
    ) -> Result<ConnectionOutcome, PeerViewError> {
        if Handle::try_current().is_ok() {
            return Err(PeerViewError::InvalidState {
                expected: "blocking caller thread".to_string(),
                actual: "async runtime thread".to_string(),
            });
        }

        let waiter = self.launch_session(request)?;
        match self
            .runtime
            .block_on(waiter.wait_timeout(self.config.session_timeout))
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.stop_session();
                Err(e)
            }
        }
    }

    /// Close the current peer session; safe to call repeatedly
    pub fn stop_session(&self) {
        if let Some(controller) = self.session.lock().controller.as_ref() {
            controller.close();
        }
    }

    /// State of the current peer session
    pub fn session_state(&self) -> Option<SessionState> {
        self.session.lock().controller.as_ref().map(|c| c.state())
    }

    /// Handle of the current peer connection, once established
    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        self.session
            .lock()
            .controller
            .as_ref()
            .and_then(|c| c.connection_handle())
    }

    /// Connection-health timeline of the current peer session
    #[cfg(feature = "diagnostics")]
    pub fn session_timeline(&self) -> Option<TimelineReport> {
        self.session
            .lock()
            .timeline
            .as_ref()
            .map(|timeline| timeline.lock().report())
    }

    /// Wait until every queued playback and session callback was applied
    pub async fn flush(&self) {
        self.playback.flush().await;
        let session = self.session.lock().controller.as_ref().map(|c| c.flush());
        if let Some(session) = session {
            session.await;
        }
    }

    /// The PeerView instance this view runs on
    pub fn peerview(&self) -> &PeerView {
        &self.peerview
    }

    fn launch_session(&self, request: SessionRequest) -> Result<GateWaiter, PeerViewError> {
        let mut slot = self.session.lock();
        if let Some(existing) = slot.controller.as_ref() {
            match existing.state() {
                state if state.is_terminal() => {
                    debug!("Replacing finished session {}", existing.id());
                }
                SessionState::Connected => {
                    return Err(PeerViewError::InvalidState {
                        expected: "no active peer session".to_string(),
                        actual: "connected".to_string(),
                    });
                }
                state => {
                    warn!("Session {} still pending in {:?}", existing.id(), state);
                    return Err(PeerViewError::SessionPending);
                }
            }
        }
        if let Some(forwarder) = slot.forwarder.take() {
            forwarder.abort();
        }
        slot.controller = None;

        let (controller, waiter) = PeerSessionController::start(
            request.channel,
            request.peer,
            request.room,
            self.config.session.clone(),
            request.capturer,
            &self.runtime,
        );
        if let Some(sink) = self.remote_video.lock().clone() {
            controller.remote_sink().set_target(Some(sink));
        }

        #[cfg(feature = "diagnostics")]
        {
            let timeline = Arc::new(Mutex::new(SessionTimeline::start(controller.id())));
            let recorder = timeline.clone();
            slot.forwarder = Some(forward(
                &self.runtime,
                controller.subscribe(),
                self.hub.clone(),
                move |event| {
                    recorder.lock().observe(&event);
                    Event::Session(event)
                },
            ));
            slot.timeline = Some(timeline);
        }
        #[cfg(not(feature = "diagnostics"))]
        {
            slot.forwarder = Some(forward(
                &self.runtime,
                controller.subscribe(),
                self.hub.clone(),
                Event::Session,
            ));
        }

        info!("Started peer session {}", controller.id());
        slot.controller = Some(controller);
        Ok(waiter)
    }
}

impl Drop for VideoView {
    fn drop(&mut self) {
        self.playback_forwarder.abort();
        let mut slot = self.session.lock();
        if let Some(forwarder) = slot.forwarder.take() {
            forwarder.abort();
        }
        slot.controller = None;
    }
}
