//! Peer connection collaborator
//!
//! The peer connection library is opaque: the session controller drives it
//! through [`PeerConnectionClient`] and hears back through
//! [`PeerConnectionEvents`].

use crate::protocol::{
    IceCandidate, IceGatheringState, SessionDescription, SignalingParameters, StatsReport,
};
use crate::session::SessionInput;
use peerview_core::PeerViewError;
use peerview_media::VideoSink;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Callbacks the peer connection raises
#[derive(Debug, Clone, PartialEq)]
pub enum PeerConnectionEvent {
    /// The native connection object exists
    Created,
    /// Our offer or answer is ready
    LocalDescription(SessionDescription),
    /// One of our candidates was gathered
    IceCandidate(IceCandidate),
    /// Some of our candidates were withdrawn
    IceCandidatesRemoved(Vec<IceCandidate>),
    /// ICE gathering progressed
    IceGatheringChange(IceGatheringState),
    /// ICE connectivity established
    IceConnected,
    /// ICE connectivity lost
    IceDisconnected,
    /// DTLS connected
    Connected,
    /// DTLS disconnected
    Disconnected,
    /// The connection closed itself
    Closed,
    /// Periodic statistics
    StatsReady(Vec<StatsReport>),
    /// The connection failed
    Error(String),
}

impl PeerConnectionEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            PeerConnectionEvent::Created => "created",
            PeerConnectionEvent::LocalDescription(_) => "local_description",
            PeerConnectionEvent::IceCandidate(_) => "ice_candidate",
            PeerConnectionEvent::IceCandidatesRemoved(_) => "ice_candidates_removed",
            PeerConnectionEvent::IceGatheringChange(_) => "ice_gathering_change",
            PeerConnectionEvent::IceConnected => "ice_connected",
            PeerConnectionEvent::IceDisconnected => "ice_disconnected",
            PeerConnectionEvent::Connected => "connected",
            PeerConnectionEvent::Disconnected => "disconnected",
            PeerConnectionEvent::Closed => "closed",
            PeerConnectionEvent::StatsReady(_) => "stats_ready",
            PeerConnectionEvent::Error(_) => "error",
        }
    }
}

/// Handle the peer connection uses to report events
#[derive(Debug, Clone)]
pub struct PeerConnectionEvents {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl PeerConnectionEvents {
    /// Report into the given session queue
    pub fn new(tx: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { tx }
    }

    /// Native connection created
    pub fn on_peer_connection_created(&self) {
        self.send(PeerConnectionEvent::Created);
    }

    /// Local description ready
    pub fn on_local_description(&self, sdp: SessionDescription) {
        self.send(PeerConnectionEvent::LocalDescription(sdp));
    }

    /// Local candidate gathered
    pub fn on_ice_candidate(&self, candidate: IceCandidate) {
        self.send(PeerConnectionEvent::IceCandidate(candidate));
    }

    /// Local candidates withdrawn
    pub fn on_ice_candidates_removed(&self, candidates: Vec<IceCandidate>) {
        self.send(PeerConnectionEvent::IceCandidatesRemoved(candidates));
    }

    /// ICE gathering progressed
    pub fn on_ice_gathering_change(&self, state: IceGatheringState) {
        self.send(PeerConnectionEvent::IceGatheringChange(state));
    }

    /// ICE connected
    pub fn on_ice_connected(&self) {
        self.send(PeerConnectionEvent::IceConnected);
    }

    /// ICE disconnected
    pub fn on_ice_disconnected(&self) {
        self.send(PeerConnectionEvent::IceDisconnected);
    }

    /// DTLS connected
    pub fn on_connected(&self) {
        self.send(PeerConnectionEvent::Connected);
    }

    /// DTLS disconnected
    pub fn on_disconnected(&self) {
        self.send(PeerConnectionEvent::Disconnected);
    }

    /// Connection closed
    pub fn on_peer_connection_closed(&self) {
        self.send(PeerConnectionEvent::Closed);
    }

    /// Statistics ready
    pub fn on_stats_ready(&self, reports: Vec<StatsReport>) {
        self.send(PeerConnectionEvent::StatsReady(reports));
    }

    /// Connection failed
    pub fn on_peer_connection_error(&self, description: impl Into<String>) {
        self.send(PeerConnectionEvent::Error(description.into()));
    }

    /// Report an already built event
    pub fn send(&self, event: PeerConnectionEvent) {
        let kind = event.kind();
        if self.tx.send(SessionInput::Peer(event)).is_err() {
            debug!("Peer connection {} after session shutdown", kind);
        }
    }
}

/// Media and codec options for the peer connection
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConnectionParameters {
    /// Send and receive video
    pub video_call_enabled: bool,
    /// Loop media back for testing
    pub loopback: bool,
    /// Capture width, 0 for default
    pub video_width: u32,
    /// Capture height, 0 for default
    pub video_height: u32,
    /// Capture frame rate, 0 for default
    pub video_fps: u32,
    /// Maximum video bitrate applied once negotiation starts
    pub video_max_bitrate_kbps: Option<u32>,
    /// Preferred video codec
    pub video_codec: String,
    /// Prefer hardware video codecs
    pub video_codec_hw_acceleration: bool,
    /// Preferred audio codec
    pub audio_codec: String,
    /// Start bitrate for audio, 0 for default
    pub audio_start_bitrate_kbps: u32,
    /// Disable built-in acoustic echo cancellation
    pub disable_built_in_aec: bool,
    /// Disable built-in noise suppression
    pub disable_built_in_ns: bool,
}

impl Default for PeerConnectionParameters {
    fn default() -> Self {
        Self {
            video_call_enabled: true,
            loopback: false,
            video_width: 0,
            video_height: 0,
            video_fps: 0,
            video_max_bitrate_kbps: None,
            video_codec: "H264 High".to_string(),
            video_codec_hw_acceleration: true,
            audio_codec: "OPUS".to_string(),
            audio_start_bitrate_kbps: 0,
            disable_built_in_aec: false,
            disable_built_in_ns: false,
        }
    }
}

/// Local video source handed to the peer connection
///
/// Capture itself is out of scope; implementations wrap whatever the
/// platform provides.
pub trait VideoCapturer: Send {
    /// Device name, for logs
    fn name(&self) -> &str;
}

/// The opaque peer connection library
pub trait PeerConnectionClient: Send {
    /// Prepare the connection factory
    fn create_factory(&mut self, params: &PeerConnectionParameters) -> Result<(), PeerViewError>;

    /// Create the native connection; completion is reported as
    /// [`PeerConnectionEvent::Created`]
    fn create_peer_connection(
        &mut self,
        local_sink: Arc<dyn VideoSink>,
        remote_sinks: Vec<Arc<dyn VideoSink>>,
        capturer: Option<Box<dyn VideoCapturer>>,
        params: &SignalingParameters,
        events: PeerConnectionEvents,
    );

    /// Create an offer; reported as a local description
    fn create_offer(&mut self);

    /// Create an answer; reported as a local description
    fn create_answer(&mut self);

    /// Apply the remote description
    fn set_remote_description(&mut self, sdp: &SessionDescription);

    /// Add a remote candidate
    fn add_remote_ice_candidate(&mut self, candidate: &IceCandidate);

    /// Remove remote candidates
    fn remove_remote_ice_candidates(&mut self, candidates: &[IceCandidate]);

    /// Cap the video send bitrate
    fn set_video_max_bitrate(&mut self, kbps: u32);

    /// Native connection handle, 0 while none exists
    fn native_handle(&self) -> u64;

    /// Release the native connection
    fn close(&mut self);
}
