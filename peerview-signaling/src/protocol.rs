//! Signaling protocol types
//!
//! Session descriptions, ICE candidates and the parameters exchanged when
//! joining a room. All types serialize with serde so channel implementations
//! can put them on the wire as they are.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    #[serde(rename = "pranswer")]
    PrAnswer,
    /// Final answer
    Answer,
}

impl SdpType {
    /// Canonical lowercase name
    pub fn canonical_form(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::PrAnswer => "pranswer",
            SdpType::Answer => "answer",
        }
    }

    /// Parse the canonical lowercase name
    pub fn from_canonical_form(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(SdpType::Offer),
            "pranswer" => Some(SdpType::PrAnswer),
            "answer" => Some(SdpType::Answer),
            _ => None,
        }
    }
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_form())
    }
}

/// SDP document plus its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create a session description
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// One ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Media stream identification tag
    pub sdp_mid: String,
    /// Index of the media description the candidate belongs to
    pub sdp_mline_index: u32,
    /// Candidate attribute without the `a=` prefix
    pub sdp: String,
}

impl IceCandidate {
    /// Create a candidate
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u32, sdp: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            sdp: sdp.into(),
        }
    }
}

/// STUN/TURN server
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URIs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default)]
    pub username: String,
    /// TURN password
    #[serde(default)]
    pub password: String,
}

/// Which side creates the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingRole {
    /// Creates and sends the offer
    Initiator,
    /// Waits for the offer and answers it
    Responder,
}

/// Parameters reported once the room is joined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingParameters {
    /// ICE servers to use
    pub ice_servers: Vec<IceServer>,
    /// Our role in the negotiation
    pub role: SignalingRole,
    /// Client id assigned by the room, if any
    pub client_id: Option<String>,
    /// Offer already posted by the remote side
    pub offer_sdp: Option<SessionDescription>,
    /// Remote candidates already posted by the remote side
    #[serde(default)]
    pub ice_candidates: Vec<IceCandidate>,
}

impl SignalingParameters {
    /// Parameters for the side that creates the offer
    pub fn initiator(ice_servers: Vec<IceServer>) -> Self {
        Self {
            ice_servers,
            role: SignalingRole::Initiator,
            client_id: None,
            offer_sdp: None,
            ice_candidates: Vec::new(),
        }
    }

    /// Parameters for the side that answers `offer_sdp`
    pub fn responder(
        ice_servers: Vec<IceServer>,
        offer_sdp: Option<SessionDescription>,
        ice_candidates: Vec<IceCandidate>,
    ) -> Self {
        Self {
            ice_servers,
            role: SignalingRole::Responder,
            client_id: None,
            offer_sdp,
            ice_candidates,
        }
    }

    /// Whether we create the offer
    pub fn is_initiator(&self) -> bool {
        self.role == SignalingRole::Initiator
    }
}

/// Credentials for a relayed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCredentials {
    /// Relay access token
    pub token: String,
    /// Relay realm
    pub realm: String,
    /// Opaque device state forwarded with the request
    pub info: Option<String>,
}

/// What is needed to join a room
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomConnectionParameters {
    /// Device identifier
    pub device_id: String,
    /// Device credential
    pub credential: String,
    /// Relay credentials; `None` connects directly
    pub relay: Option<RelayCredentials>,
}

impl RoomConnectionParameters {
    /// Direct connection to a device
    pub fn new(device_id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            credential: credential.into(),
            relay: None,
        }
    }

    /// Go through a relay
    pub fn with_relay(mut self, relay: RelayCredentials) -> Self {
        self.relay = Some(relay);
        self
    }
}

/// Local ICE gathering progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IceGatheringState {
    /// Not started
    #[default]
    New,
    /// Gathering
    Gathering,
    /// All candidates gathered
    Complete,
}

/// One statistics report from the peer connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    /// Report id
    pub id: String,
    /// Report type
    pub kind: String,
    /// Timestamp in microseconds
    pub timestamp_us: f64,
    /// Reported values
    pub values: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_format() {
        let desc = SessionDescription::new(SdpType::Answer, "v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0\r\n");

        let parsed: SessionDescription =
            serde_json::from_str(r#"{"type":"pranswer","sdp":""}"#).unwrap();
        assert_eq!(parsed.sdp_type, SdpType::PrAnswer);
    }

    #[test]
    fn test_sdp_type_canonical_form() {
        for kind in [SdpType::Offer, SdpType::PrAnswer, SdpType::Answer] {
            assert_eq!(SdpType::from_canonical_form(kind.canonical_form()), Some(kind));
        }
        assert_eq!(SdpType::from_canonical_form("rollback"), None);
    }
}
