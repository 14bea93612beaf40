//! Command-channel signaling client
//!
//! Signals a device over a request/response command transport. Every request
//! is a JSON object `{"func": <name>, "args": {...}}` and every response
//! carries a `statusCode` plus an optional `content` object. The device does
//! not trickle ICE, so the offer is sent once, with every gathered candidate
//! embedded, when gathering completes (or after a grace period).

use crate::channel::{SignalingChannel, SignalingEvents};
use crate::protocol::{
    IceCandidate, IceGatheringState, IceServer, RoomConnectionParameters, SdpType,
    SessionDescription, SignalingParameters,
};
use crate::sdp::{embed_candidates, parse_answer_candidates, strip_ice_options};
use async_trait::async_trait;
use parking_lot::Mutex;
use peerview_core::PeerViewError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STATUS_OK: i64 = 200;

/// Request/response transport to the device
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Open the client context for a device
    async fn open(&self, device_id: &str, credential: &str) -> Result<(), PeerViewError>;

    /// Send one request and wait for its response
    async fn send_command(&self, request: &str, timeout: Duration) -> Result<String, PeerViewError>;
}

/// Command-channel client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChannelConfig {
    /// Timeout of a single command
    pub command_timeout: Duration,
    /// How long to wait for ICE gathering to complete once the offer exists
    pub gathering_grace: Duration,
}

impl Default for CommandChannelConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(5000),
            gathering_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Serialize)]
struct CommandRequest<'a, A> {
    func: &'a str,
    args: A,
}

#[derive(Serialize)]
struct StartArgs<'a> {
    am_token: &'a str,
    realm: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<&'a str>,
}

#[derive(Serialize)]
struct ExchangeArgs<'a> {
    #[serde(rename = "type")]
    sdp_type: &'a str,
    sdp: &'a str,
    #[serde(rename = "RTC_ID", skip_serializing_if = "Option::is_none")]
    rtc_id: Option<i64>,
}

#[derive(Serialize)]
struct StopArgs {
    #[serde(rename = "RTC_ID")]
    rtc_id: i64,
}

#[derive(Deserialize)]
struct CommandResponse {
    #[serde(rename = "statusCode", default)]
    status_code: i64,
    #[serde(default)]
    content: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StartContent {
    #[serde(rename = "RTC_ID", default)]
    rtc_id: i64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    uris: Vec<String>,
}

#[derive(Deserialize)]
struct AnswerContent {
    #[serde(rename = "type")]
    sdp_type: String,
    sdp: String,
}

fn encode<A: Serialize>(func: &str, args: A) -> Result<String, PeerViewError> {
    serde_json::to_string(&CommandRequest { func, args }).map_err(|e| {
        PeerViewError::InvalidMessage {
            message: func.to_string(),
            source: Box::new(e),
        }
    })
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, PeerViewError> {
    serde_json::from_str(raw).map_err(|e| PeerViewError::InvalidMessage {
        message: raw.to_string(),
        source: Box::new(e),
    })
}

fn decode_content<T: for<'de> Deserialize<'de>>(
    content: Option<serde_json::Value>,
) -> Result<T, PeerViewError> {
    let value = content.ok_or_else(|| PeerViewError::InvalidData {
        reason: "response without content".to_string(),
    })?;
    let raw = value.to_string();
    serde_json::from_value(value).map_err(|e| PeerViewError::InvalidMessage {
        message: raw,
        source: Box::new(e),
    })
}

#[derive(Default)]
struct ChannelState {
    events: Option<SignalingEvents>,
    rtc_id: Option<i64>,
    offer: Option<SessionDescription>,
    local_candidates: Vec<IceCandidate>,
    gathering: IceGatheringState,
    exchanged: bool,
    closed: bool,
}

struct Shared {
    id: Uuid,
    transport: Arc<dyn CommandTransport>,
    config: CommandChannelConfig,
    state: Mutex<ChannelState>,
}

impl Shared {
    fn events(&self) -> Option<SignalingEvents> {
        let state = self.state.lock();
        if state.closed {
            None
        } else {
            state.events.clone()
        }
    }

    fn report_error(&self, error: PeerViewError) {
        error!("Command channel {}: {}", self.id, error);
        if let Some(events) = self.events() {
            events.on_channel_error(error.to_string());
        }
    }

    async fn command(&self, request: &str) -> Result<CommandResponse, PeerViewError> {
        debug!("Command channel {} send {}", self.id, request);
        let raw = self
            .transport
            .send_command(request, self.config.command_timeout)
            .await?;
        decode(&raw)
    }

    async fn join(self: Arc<Self>, room: RoomConnectionParameters) {
        if let Err(e) = self.open_room(&room).await {
            self.report_error(e);
        }
    }

    async fn open_room(&self, room: &RoomConnectionParameters) -> Result<(), PeerViewError> {
        self.transport.open(&room.device_id, &room.credential).await?;

        let mut ice_servers = Vec::new();
        if let Some(relay) = &room.relay {
            let request = encode(
                "startWebRTC",
                StartArgs {
                    am_token: &relay.token,
                    realm: &relay.realm,
                    info: relay.info.as_deref(),
                },
            )?;
            let response = self.command(&request).await?;
            if response.status_code != STATUS_OK {
                return Err(PeerViewError::SignalingChannel {
                    reason: format!("startWebRTC failed with status {}", response.status_code),
                });
            }

            let content: StartContent = decode_content(response.content)?;
            info!("Command channel {} relay session {}", self.id, content.rtc_id);
            self.state.lock().rtc_id = Some(content.rtc_id).filter(|id| *id != 0);
            ice_servers.push(IceServer {
                urls: content.uris,
                username: content.username,
                password: content.password,
            });
        }

        // The device always waits for our offer
        if let Some(events) = self.events() {
            events.on_connected_to_room(SignalingParameters::initiator(ice_servers));
        }
        Ok(())
    }

    /// Build the exchange request if the offer is ready and not sent yet
    fn take_exchange(&self) -> Option<Result<String, PeerViewError>> {
        let mut state = self.state.lock();
        if state.exchanged || state.closed {
            return None;
        }
        let offer = state.offer.as_ref()?;
        let sdp = embed_candidates(&strip_ice_options(&offer.sdp), &state.local_candidates);
        state.exchanged = true;
        Some(encode(
            "exchangeSdp",
            ExchangeArgs {
                sdp_type: SdpType::Offer.canonical_form(),
                sdp: &sdp,
                rtc_id: state.rtc_id,
            },
        ))
    }

    async fn exchange(self: Arc<Self>) {
        let request = match self.take_exchange() {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                self.report_error(e);
                return;
            }
            None => return,
        };
        if let Err(e) = self.exchange_offer(&request).await {
            self.report_error(e);
        }
    }

    async fn exchange_offer(&self, request: &str) -> Result<(), PeerViewError> {
        let response = self.command(request).await?;
        if response.status_code != STATUS_OK {
            self.stop().await;
            return Err(PeerViewError::SignalingChannel {
                reason: format!("exchangeSdp failed with status {}", response.status_code),
            });
        }

        let content: AnswerContent = decode_content(response.content)?;
        let sdp_type = SdpType::from_canonical_form(&content.sdp_type).ok_or_else(|| {
            PeerViewError::InvalidData {
                reason: format!("unknown description type {:?}", content.sdp_type),
            }
        })?;
        let answer = SessionDescription::new(sdp_type, format!("{}\r\n", content.sdp.trim()));
        let candidates = parse_answer_candidates(&answer.sdp);
        info!(
            "Command channel {} received {} with {} candidates",
            self.id,
            sdp_type,
            candidates.len()
        );

        if let Some(events) = self.events() {
            events.on_remote_description(answer);
            for candidate in candidates {
                events.on_remote_ice_candidate(candidate);
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        let Some(rtc_id) = self.state.lock().rtc_id.take() else {
            return;
        };
        let request = match encode("stopWebRTC", StopArgs { rtc_id }) {
            Ok(request) => request,
            Err(e) => {
                warn!("Command channel {}: {}", self.id, e);
                return;
            }
        };
        match self.command(&request).await {
            Ok(response) if response.status_code == STATUS_OK => {
                debug!("Command channel {} stopped relay session {}", self.id, rtc_id);
            }
            Ok(response) => warn!("stopWebRTC failed with status {}", response.status_code),
            Err(e) => warn!("stopWebRTC failed: {}", e),
        }
    }
}

/// [`SignalingChannel`] over a [`CommandTransport`]
pub struct CommandChannelClient {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl std::fmt::Debug for CommandChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannelClient")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl CommandChannelClient {
    /// Create a client; network work runs on `runtime`
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        config: CommandChannelConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                transport,
                config,
                state: Mutex::new(ChannelState::default()),
            }),
            runtime,
        }
    }

    /// Whether the offer was already handed to the device
    pub fn offer_exchanged(&self) -> bool {
        self.shared.state.lock().exchanged
    }

    fn spawn_exchange(&self) {
        self.runtime.spawn(self.shared.clone().exchange());
    }
}

impl SignalingChannel for CommandChannelClient {
    fn connect_to_room(&mut self, params: RoomConnectionParameters, events: SignalingEvents) {
        info!(
            "Command channel {} connecting to {} ({})",
            self.shared.id,
            params.device_id,
            if params.relay.is_some() { "relayed" } else { "direct" }
        );
        self.shared.state.lock().events = Some(events);
        self.runtime.spawn(self.shared.clone().join(params));
    }

    fn send_offer_sdp(&mut self, sdp: &SessionDescription) {
        let complete = {
            let mut state = self.shared.state.lock();
            state.offer = Some(sdp.clone());
            state.gathering == IceGatheringState::Complete
        };

        if complete {
            self.spawn_exchange();
        } else {
            debug!(
                "Command channel {} holding offer until gathering completes",
                self.shared.id
            );
            let shared = self.shared.clone();
            let grace = shared.config.gathering_grace;
            self.runtime.spawn(async move {
                tokio::time::sleep(grace).await;
                shared.exchange().await;
            });
        }
    }

    fn send_answer_sdp(&mut self, sdp: &SessionDescription) {
        warn!(
            "Command channel {} ignoring {}: the device only answers",
            self.shared.id, sdp.sdp_type
        );
    }

    fn send_local_ice_candidate(&mut self, candidate: &IceCandidate) {
        let mut state = self.shared.state.lock();
        if state.exchanged {
            debug!("Dropping candidate gathered after the offer was sent");
            return;
        }
        state.local_candidates.push(candidate.clone());
    }

    fn send_local_ice_candidate_removals(&mut self, candidates: &[IceCandidate]) {
        self.shared
            .state
            .lock()
            .local_candidates
            .retain(|c| !candidates.contains(c));
    }

    fn send_ice_gathering_state(&mut self, gathering: IceGatheringState) {
        debug!("Command channel {} ICE gathering {:?}", self.shared.id, gathering);
        let ready = {
            let mut state = self.shared.state.lock();
            state.gathering = gathering;
            gathering == IceGatheringState::Complete && state.offer.is_some()
        };
        if ready {
            self.spawn_exchange();
        }
    }

    fn disconnect_from_room(&mut self) {
        info!("Command channel {} disconnecting", self.shared.id);
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.events = None;
        }
        let shared = self.shared.clone();
        self.runtime.spawn(async move { shared.stop().await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_shape() {
        let request = encode(
            "startWebRTC",
            StartArgs {
                am_token: "token",
                realm: "realm",
                info: None,
            },
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&request).unwrap();
        assert_eq!(value["func"], "startWebRTC");
        assert_eq!(value["args"]["am_token"], "token");
        assert!(value["args"].get("info").is_none());
    }

    #[test]
    fn test_exchange_request_omits_missing_rtc_id() {
        let request = encode(
            "exchangeSdp",
            ExchangeArgs {
                sdp_type: "offer",
                sdp: "v=0\r\n",
                rtc_id: None,
            },
        )
        .unwrap();
        assert!(!request.contains("RTC_ID"));
        assert!(request.contains("\"type\":\"offer\""));
    }

    #[test]
    fn test_malformed_response_is_invalid_message() {
        let err = decode::<CommandResponse>("not json").err().unwrap();
        assert_eq!(err.error_code(), "INVALID_MESSAGE");
    }

    #[test]
    fn test_missing_content_is_invalid_data() {
        let response: CommandResponse = decode(r#"{"statusCode":200}"#).unwrap();
        let err = decode_content::<AnswerContent>(response.content).err().unwrap();
        assert_eq!(err.error_code(), "INVALID_DATA");
    }
}
