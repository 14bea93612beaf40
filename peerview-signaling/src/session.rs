//! Peer session controller
//!
//! Drives one peer session attempt from joining the room to an open (or
//! failed) peer connection. Signaling and peer connection callbacks are queued
//! and applied one at a time by a drain task under the session lock. Once the
//! session is closed or failed every further callback is dropped, so teardown
//! never has to wait for callbacks still in flight.

use crate::channel::{SignalingChannel, SignalingEvent, SignalingEvents};
use crate::gate::{session_gate, ConnectionHandle, ConnectionOutcome, GateOpener, GateWaiter};
use crate::peer::{
    PeerConnectionClient, PeerConnectionEvent, PeerConnectionEvents, PeerConnectionParameters,
    VideoCapturer,
};
use crate::protocol::{
    IceCandidate, RoomConnectionParameters, SdpType, SessionDescription, SignalingParameters,
    SignalingRole, StatsReport,
};
use parking_lot::Mutex;
use peerview_core::PeerViewError;
use peerview_media::{ProxyVideoSink, VideoSink};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback queued for the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// From the signaling channel
    Signaling(SignalingEvent),
    /// From the peer connection
    Peer(PeerConnectionEvent),
}

/// Identifier of one session attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Negotiation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started
    Idle,
    /// Waiting for the signaling channel to join the room
    AwaitingRoomConnection,
    /// Waiting for the remote offer or answer
    AwaitingRemoteDescription,
    /// Creating our description and exchanging candidates
    NegotiatingLocal,
    /// The peer connection is open
    Connected,
    /// Torn down by either side
    Closed,
    /// Failed; a new session is required
    Failed,
}

impl SessionState {
    /// Whether no further events are processed
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Notifications published by the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// State changed
    StateChanged(SessionState),
    /// Room joined with the given role
    RoomConnected(SignalingRole),
    /// Our description was handed to the signaling channel
    LocalDescriptionSent(SdpType),
    /// The remote description was applied
    RemoteDescriptionApplied(SdpType),
    /// ICE connected
    IceConnected,
    /// ICE disconnected
    IceDisconnected,
    /// DTLS connected
    DtlsConnected,
    /// DTLS disconnected
    DtlsDisconnected,
    /// Statistics from the peer connection
    Stats(Vec<StatsReport>),
    /// The peer connection is open
    Established(ConnectionHandle),
    /// The session failed
    Failed {
        /// Error code for programmatic handling
        code: String,
        /// Description
        reason: String,
    },
    /// The session was closed
    Closed(String),
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Media and codec options
    pub peer: PeerConnectionParameters,
    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer: PeerConnectionParameters::default(),
            event_capacity: 64,
        }
    }
}

struct PeerSession {
    id: SessionId,
    state: SessionState,
    role: Option<SignalingRole>,
    config: SessionConfig,
    channel: Option<Box<dyn SignalingChannel>>,
    peer: Option<Box<dyn PeerConnectionClient>>,
    capturer: Option<Box<dyn VideoCapturer>>,
    connection_created: bool,
    handle: Option<ConnectionHandle>,
    pending_remote: Option<SessionDescription>,
    pending_candidates: Vec<IceCandidate>,
    local_sink: Arc<ProxyVideoSink>,
    remote_sink: Arc<ProxyVideoSink>,
    gate: GateOpener,
    inputs: mpsc::UnboundedSender<SessionInput>,
    events: broadcast::Sender<SessionEvent>,
    started_at: Instant,
}

impl PeerSession {
    fn begin(&mut self, room: RoomConnectionParameters) {
        self.set_state(SessionState::AwaitingRoomConnection);

        let factory = match self.peer.as_mut() {
            Some(peer) => peer.create_factory(&self.config.peer),
            None => return,
        };
        if let Err(e) = factory {
            self.fail(e);
            return;
        }

        info!("Session {} connecting to room for {}", self.id, room.device_id);
        let events = SignalingEvents::new(self.inputs.clone());
        if let Some(channel) = self.channel.as_mut() {
            channel.connect_to_room(room, events);
        }
    }

    fn handle(&mut self, input: SessionInput) {
        if self.state.is_terminal() {
            let kind = match &input {
                SessionInput::Signaling(event) => event.kind(),
                SessionInput::Peer(event) => event.kind(),
            };
            debug!("Session {} dropping late {} ({:?})", self.id, kind, self.state);
            return;
        }

        match input {
            SessionInput::Signaling(event) => self.on_signaling(event),
            SessionInput::Peer(event) => self.on_peer(event),
        }
    }

    fn on_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::ConnectedToRoom(params) => {
                if self.state != SessionState::AwaitingRoomConnection {
                    warn!("Session {} ignoring room connection in {:?}", self.id, self.state);
                    return;
                }
                self.on_connected_to_room(params);
            }
            SignalingEvent::RemoteDescription(sdp) => self.on_remote_description(sdp),
            SignalingEvent::RemoteIceCandidate(candidate) => match self.created_peer() {
                Some(peer) => peer.add_remote_ice_candidate(&candidate),
                None => {
                    debug!("Queueing remote ICE candidate until the connection exists");
                    self.pending_candidates.push(candidate);
                }
            },
            SignalingEvent::RemoteIceCandidatesRemoved(candidates) => {
                match self.created_peer() {
                    Some(peer) => peer.remove_remote_ice_candidates(&candidates),
                    None => self.pending_candidates.retain(|c| !candidates.contains(c)),
                }
            }
            SignalingEvent::ChannelClose => {
                info!("Session {}: remote end hung up", self.id);
                self.close("remote end hung up");
            }
            SignalingEvent::ChannelError(reason) => {
                self.fail(PeerViewError::SignalingChannel { reason });
            }
        }
    }

    fn on_peer(&mut self, event: PeerConnectionEvent) {
        match event {
            PeerConnectionEvent::Created => self.on_peer_connection_created(),
            PeerConnectionEvent::LocalDescription(sdp) => self.on_local_description(sdp),
            PeerConnectionEvent::IceCandidate(candidate) => {
                if let Some(channel) = self.channel.as_mut() {
                    channel.send_local_ice_candidate(&candidate);
                }
            }
            PeerConnectionEvent::IceCandidatesRemoved(candidates) => {
                if let Some(channel) = self.channel.as_mut() {
                    channel.send_local_ice_candidate_removals(&candidates);
                }
            }
            PeerConnectionEvent::IceGatheringChange(state) => {
                if let Some(channel) = self.channel.as_mut() {
                    channel.send_ice_gathering_state(state);
                }
            }
            PeerConnectionEvent::IceConnected => {
                info!("Session {} ICE connected, delay={}ms", self.id, self.elapsed_ms());
                self.publish(SessionEvent::IceConnected);
            }
            PeerConnectionEvent::IceDisconnected => {
                info!("Session {} ICE disconnected", self.id);
                self.publish(SessionEvent::IceDisconnected);
            }
            PeerConnectionEvent::Connected => {
                info!("Session {} DTLS connected, delay={}ms", self.id, self.elapsed_ms());
                self.publish(SessionEvent::DtlsConnected);
            }
            PeerConnectionEvent::Disconnected => {
                info!("Session {} DTLS disconnected", self.id);
                self.publish(SessionEvent::DtlsDisconnected);
                self.close("DTLS disconnected");
            }
            PeerConnectionEvent::Closed => debug!("Session {} peer connection closed", self.id),
            PeerConnectionEvent::StatsReady(reports) => self.publish(SessionEvent::Stats(reports)),
            PeerConnectionEvent::Error(reason) => {
                self.fail(PeerViewError::PeerConnection { reason });
            }
        }
    }

    fn on_connected_to_room(&mut self, params: SignalingParameters) {
        info!(
            "Session {} joined room as {:?}, creating peer connection, delay={}ms",
            self.id,
            params.role,
            self.elapsed_ms()
        );
        self.role = Some(params.role);
        self.publish(SessionEvent::RoomConnected(params.role));

        let Some(mut peer) = self.peer.take() else {
            return;
        };
        let capturer = if self.config.peer.video_call_enabled {
            self.capturer.take()
        } else {
            None
        };
        let local_sink: Arc<dyn VideoSink> = self.local_sink.clone();
        let remote_sink: Arc<dyn VideoSink> = self.remote_sink.clone();
        peer.create_peer_connection(
            local_sink,
            vec![remote_sink],
            capturer,
            &params,
            PeerConnectionEvents::new(self.inputs.clone()),
        );
        self.connection_created = true;

        let next = match params.role {
            SignalingRole::Initiator => {
                debug!("Session {} creating offer", self.id);
                peer.create_offer();
                SessionState::NegotiatingLocal
            }
            SignalingRole::Responder => {
                let offer = match (params.offer_sdp.clone(), self.pending_remote.take()) {
                    (Some(posted), Some(_)) => {
                        debug!("Session {} dropping queued offer, room already carries one", self.id);
                        Some(posted)
                    }
                    (posted, queued) => posted.or(queued),
                };
                let next = match offer {
                    Some(offer) => {
                        peer.set_remote_description(&offer);
                        debug!("Session {} creating answer", self.id);
                        peer.create_answer();
                        SessionState::NegotiatingLocal
                    }
                    None => SessionState::AwaitingRemoteDescription,
                };
                for candidate in &params.ice_candidates {
                    peer.add_remote_ice_candidate(candidate);
                }
                next
            }
        };

        for candidate in self.pending_candidates.drain(..) {
            peer.add_remote_ice_candidate(&candidate);
        }
        self.peer = Some(peer);
        self.set_state(next);

        // An answer that raced ahead of the room connection; a responder
        // already consumed its queued offer above
        if let Some(sdp) = self.pending_remote.take() {
            self.on_remote_description(sdp);
        }
    }

    fn on_remote_description(&mut self, sdp: SessionDescription) {
        let responder = self.role == Some(SignalingRole::Responder);
        let elapsed = self.elapsed_ms();
        let Some(peer) = self.created_peer() else {
            debug!("Queueing remote {} until the connection exists", sdp.sdp_type);
            self.pending_remote = Some(sdp);
            return;
        };

        info!("Received remote {}, delay={}ms", sdp.sdp_type, elapsed);
        peer.set_remote_description(&sdp);
        if responder {
            debug!("Creating answer");
            peer.create_answer();
        }

        self.publish(SessionEvent::RemoteDescriptionApplied(sdp.sdp_type));
        if self.state == SessionState::AwaitingRemoteDescription {
            self.set_state(SessionState::NegotiatingLocal);
        }
    }

    fn on_local_description(&mut self, sdp: SessionDescription) {
        let initiator = self.role == Some(SignalingRole::Initiator);
        if let Some(channel) = self.channel.as_mut() {
            info!("Sending {}, delay={}ms", sdp.sdp_type, self.started_at.elapsed().as_millis());
            if initiator {
                channel.send_offer_sdp(&sdp);
            } else {
                channel.send_answer_sdp(&sdp);
            }
        }
        self.publish(SessionEvent::LocalDescriptionSent(sdp.sdp_type));

        if let Some(kbps) = self.config.peer.video_max_bitrate_kbps.filter(|k| *k > 0) {
            debug!("Set video maximum bitrate: {}", kbps);
            if let Some(peer) = self.peer.as_mut() {
                peer.set_video_max_bitrate(kbps);
            }
        }

        if initiator && self.state == SessionState::NegotiatingLocal {
            self.set_state(SessionState::AwaitingRemoteDescription);
        }
    }

    fn on_peer_connection_created(&mut self) {
        if self.handle.is_some() {
            debug!("Session {} ignoring duplicate creation callback", self.id);
            return;
        }
        let raw = match self.created_peer() {
            Some(peer) => peer.native_handle(),
            None => {
                warn!("Session {} creation callback before the connection was requested", self.id);
                return;
            }
        };

        match ConnectionHandle::new(raw) {
            Some(handle) => {
                info!("Session {} established {}", self.id, handle);
                self.handle = Some(handle);
                self.set_state(SessionState::Connected);
                self.gate.open(ConnectionOutcome::Connected(handle));
                self.publish(SessionEvent::Established(handle));
            }
            None => self.fail(PeerViewError::PeerConnection {
                reason: "peer connection created without a native handle".to_string(),
            }),
        }
    }

    fn fail(&mut self, error: PeerViewError) {
        warn!("Session {} failed: {}", self.id, error);
        self.set_state(SessionState::Failed);
        if self.gate.is_pending() {
            self.gate.open(ConnectionOutcome::Failed(error.to_string()));
        }
        self.publish(SessionEvent::Failed {
            code: error.error_code(),
            reason: error.to_string(),
        });
        self.teardown();
    }

    fn close(&mut self, reason: &str) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Failed => {
                self.teardown();
                return;
            }
            _ => {}
        }

        info!("Closing session {}: {}", self.id, reason);
        self.set_state(SessionState::Closed);
        if self.gate.is_pending() {
            let error = PeerViewError::SessionClosed {
                reason: reason.to_string(),
            };
            self.gate.open(ConnectionOutcome::Failed(error.to_string()));
        }
        self.publish(SessionEvent::Closed(reason.to_string()));
        self.teardown();
    }

    fn teardown(&mut self) {
        self.local_sink.set_target(None);
        self.remote_sink.set_target(None);
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect_from_room();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        self.pending_remote = None;
        self.pending_candidates.clear();
    }

    fn created_peer(&mut self) -> Option<&mut Box<dyn PeerConnectionClient>> {
        if self.connection_created {
            self.peer.as_mut()
        } else {
            None
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session {} {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
            self.publish(SessionEvent::StateChanged(state));
        }
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}

/// One peer session attempt and the task that drains its callbacks
pub struct PeerSessionController {
    id: SessionId,
    session: Arc<Mutex<PeerSession>>,
    flush_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    drain: JoinHandle<()>,
    // Subscribed before the attempt began; handed to the first subscriber
    first_events: Mutex<Option<broadcast::Receiver<SessionEvent>>>,
}

impl std::fmt::Debug for PeerSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSessionController")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl PeerSessionController {
    /// Start a session attempt
    ///
    /// Returns the controller and the gate that resolves once the peer
    /// connection is open or the attempt failed.
    pub fn start(
        channel: Box<dyn SignalingChannel>,
        peer: Box<dyn PeerConnectionClient>,
        room: RoomConnectionParameters,
        config: SessionConfig,
        capturer: Option<Box<dyn VideoCapturer>>,
        runtime: &Handle,
    ) -> (Self, GateWaiter) {
        let id = SessionId::new();
        let (inputs, input_rx) = mpsc::unbounded_channel();
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (events, first_events) = broadcast::channel(config.event_capacity.max(1));
        let (gate, waiter) = session_gate();

        let session = Arc::new(Mutex::new(PeerSession {
            id,
            state: SessionState::Idle,
            role: None,
            config,
            channel: Some(channel),
            peer: Some(peer),
            capturer,
            connection_created: false,
            handle: None,
            pending_remote: None,
            pending_candidates: Vec::new(),
            local_sink: Arc::new(ProxyVideoSink::new()),
            remote_sink: Arc::new(ProxyVideoSink::new()),
            gate,
            inputs,
            events,
            started_at: Instant::now(),
        }));

        let drain = runtime.spawn(drain_inputs(session.clone(), input_rx, flush_rx));
        session.lock().begin(room);

        (
            Self {
                id,
                session,
                flush_tx,
                drain,
                first_events: Mutex::new(Some(first_events)),
            },
            waiter,
        )
    }

    /// Attempt id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Negotiation progress
    pub fn state(&self) -> SessionState {
        self.session.lock().state
    }

    /// Our role, once the room was joined
    pub fn role(&self) -> Option<SignalingRole> {
        self.session.lock().role
    }

    /// Connection handle, once established
    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        self.session.lock().handle
    }

    /// Subscribe to session notifications
    ///
    /// The first subscriber also receives the events published while the
    /// attempt was starting.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        if let Some(first) = self.first_events.lock().take() {
            return first;
        }
        self.session.lock().events.subscribe()
    }

    /// Proxy the peer connection renders local video into
    pub fn local_sink(&self) -> Arc<ProxyVideoSink> {
        self.session.lock().local_sink.clone()
    }

    /// Proxy the peer connection renders remote video into
    pub fn remote_sink(&self) -> Arc<ProxyVideoSink> {
        self.session.lock().remote_sink.clone()
    }

    /// Close the session; safe to call any number of times
    pub fn close(&self) {
        self.session.lock().close("closed by caller");
    }

    /// Wait until every callback queued so far has been applied
    ///
    /// The marker is queued when this is called, so the returned future
    /// does not borrow the controller.
    pub fn flush(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = self.flush_tx.send(done_tx).is_ok();
        async move {
            if queued {
                let _ = done_rx.await;
            }
        }
    }
}

impl Drop for PeerSessionController {
    fn drop(&mut self) {
        self.drain.abort();
        self.session.lock().close("session dropped");
    }
}

async fn drain_inputs(
    session: Arc<Mutex<PeerSession>>,
    mut inputs: mpsc::UnboundedReceiver<SessionInput>,
    mut flushes: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
) {
    loop {
        tokio::select! {
            biased;
            input = inputs.recv() => match input {
                Some(input) => session.lock().handle(input),
                None => break,
            },
            done = flushes.recv() => match done {
                Some(done) => {
                    let _ = done.send(());
                }
                None => break,
            },
        }
    }
}
