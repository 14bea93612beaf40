//! # PeerView Signaling
//!
//! Peer session negotiation for PeerView: the signaling protocol types, the
//! collaborator seams for the signaling channel and the peer connection
//! library, the session controller that drives one attempt from room join to
//! an open connection, and the gate callers wait on for the outcome.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod command_channel;
pub mod gate;
pub mod peer;
pub mod protocol;
pub mod sdp;
pub mod session;

// Re-export main types
pub use channel::{SignalingChannel, SignalingEvent, SignalingEvents};
pub use command_channel::{CommandChannelClient, CommandChannelConfig, CommandTransport};
pub use gate::{session_gate, ConnectionHandle, ConnectionOutcome, GateOpener, GateWaiter};
pub use peer::{
    PeerConnectionClient, PeerConnectionEvent, PeerConnectionEvents, PeerConnectionParameters,
    VideoCapturer,
};
pub use protocol::{
    IceCandidate, IceGatheringState, IceServer, RelayCredentials, RoomConnectionParameters,
    SdpType, SessionDescription, SignalingParameters, SignalingRole, StatsReport,
};
pub use session::{
    PeerSessionController, SessionConfig, SessionEvent, SessionId, SessionInput, SessionState,
};
