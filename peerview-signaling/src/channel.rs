//! Signaling channel collaborator
//!
//! A [`SignalingChannel`] carries session descriptions and ICE candidates to
//! the remote side. It reports back through the [`SignalingEvents`] handle it
//! receives when asked to join a room.

use crate::protocol::{
    IceCandidate, IceGatheringState, RoomConnectionParameters, SessionDescription,
    SignalingParameters,
};
use crate::session::SessionInput;
use tokio::sync::mpsc;
use tracing::debug;

/// Callbacks a signaling channel raises
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// The room was joined
    ConnectedToRoom(SignalingParameters),
    /// The remote side sent its description
    RemoteDescription(SessionDescription),
    /// The remote side sent a candidate
    RemoteIceCandidate(IceCandidate),
    /// The remote side withdrew candidates
    RemoteIceCandidatesRemoved(Vec<IceCandidate>),
    /// The remote side hung up
    ChannelClose,
    /// The channel failed
    ChannelError(String),
}

impl SignalingEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingEvent::ConnectedToRoom(_) => "connected_to_room",
            SignalingEvent::RemoteDescription(_) => "remote_description",
            SignalingEvent::RemoteIceCandidate(_) => "remote_ice_candidate",
            SignalingEvent::RemoteIceCandidatesRemoved(_) => "remote_ice_candidates_removed",
            SignalingEvent::ChannelClose => "channel_close",
            SignalingEvent::ChannelError(_) => "channel_error",
        }
    }
}

/// Handle a signaling channel uses to report events
#[derive(Debug, Clone)]
pub struct SignalingEvents {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl SignalingEvents {
    /// Report into the given session queue
    pub fn new(tx: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { tx }
    }

    /// Room joined
    pub fn on_connected_to_room(&self, params: SignalingParameters) {
        self.send(SignalingEvent::ConnectedToRoom(params));
    }

    /// Remote description received
    pub fn on_remote_description(&self, sdp: SessionDescription) {
        self.send(SignalingEvent::RemoteDescription(sdp));
    }

    /// Remote candidate received
    pub fn on_remote_ice_candidate(&self, candidate: IceCandidate) {
        self.send(SignalingEvent::RemoteIceCandidate(candidate));
    }

    /// Remote candidates withdrawn
    pub fn on_remote_ice_candidates_removed(&self, candidates: Vec<IceCandidate>) {
        self.send(SignalingEvent::RemoteIceCandidatesRemoved(candidates));
    }

    /// Remote side hung up
    pub fn on_channel_close(&self) {
        self.send(SignalingEvent::ChannelClose);
    }

    /// Channel failed
    pub fn on_channel_error(&self, description: impl Into<String>) {
        self.send(SignalingEvent::ChannelError(description.into()));
    }

    /// Report an already built event
    pub fn send(&self, event: SignalingEvent) {
        let kind = event.kind();
        if self.tx.send(SessionInput::Signaling(event)).is_err() {
            debug!("Signaling {} after session shutdown", kind);
        }
    }
}

/// Transport for session descriptions and candidates
pub trait SignalingChannel: Send {
    /// Join a room; the outcome is reported through `events`
    fn connect_to_room(&mut self, params: RoomConnectionParameters, events: SignalingEvents);

    /// Send our offer
    fn send_offer_sdp(&mut self, sdp: &SessionDescription);

    /// Send our answer
    fn send_answer_sdp(&mut self, sdp: &SessionDescription);

    /// Send one of our candidates
    fn send_local_ice_candidate(&mut self, candidate: &IceCandidate);

    /// Withdraw some of our candidates
    fn send_local_ice_candidate_removals(&mut self, candidates: &[IceCandidate]);

    /// Report our ICE gathering progress
    fn send_ice_gathering_state(&mut self, state: IceGatheringState) {
        debug!("Ignoring ICE gathering state {:?}", state);
    }

    /// Leave the room
    fn disconnect_from_room(&mut self);
}
