//! Command-channel signaling client tests
//!
//! A scripted transport answers each command in order and records what was
//! sent; the client's signaling callbacks are read straight off the session
//! queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use peerview_core::PeerViewError;
use peerview_signaling::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

const ANSWER: &str = r#"{"statusCode":200,"content":{"type":"answer","sdp":"  v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=candidate:1 1 udp 2122260223 192.168.1.9 41000 typ host\r\na=mid:0\r\n  "}}"#;

const RELAY_START: &str = r#"{"statusCode":200,"content":{"RTC_ID":12,"username":"user","password":"pass","ttl":300,"uris":["turn:1.2.3.4:3478?transport=udp"]}}"#;

const OFFER: &str = "v=0\r\n\
    a=ice-options:trickle renomination\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=mid:0\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=mid:1\r\n";

#[derive(Default)]
struct MockTransport {
    fail_open: bool,
    opened: Mutex<Option<(String, String)>>,
    requests: Mutex<Vec<serde_json::Value>>,
    responses: Mutex<VecDeque<String>>,
}

impl MockTransport {
    fn with_responses(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            ..Default::default()
        })
    }

    fn funcs(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r["func"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn request(&self, func: &str) -> serde_json::Value {
        self.requests
            .lock()
            .iter()
            .find(|r| r["func"] == func)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl CommandTransport for MockTransport {
    async fn open(&self, device_id: &str, credential: &str) -> Result<(), PeerViewError> {
        if self.fail_open {
            return Err(PeerViewError::Initialization {
                reason: "client new failed".to_string(),
            });
        }
        *self.opened.lock() = Some((device_id.to_string(), credential.to_string()));
        Ok(())
    }

    async fn send_command(&self, request: &str, _timeout: Duration) -> Result<String, PeerViewError> {
        let value: serde_json::Value = serde_json::from_str(request).unwrap();
        self.requests.lock().push(value);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| PeerViewError::Timeout {
                operation: "send_command".to_string(),
                duration: Duration::from_millis(5000),
            })
    }
}

struct Fixture {
    client: CommandChannelClient,
    transport: Arc<MockTransport>,
    rx: mpsc::UnboundedReceiver<SessionInput>,
}

impl Fixture {
    fn new(transport: Arc<MockTransport>, grace: Duration) -> Self {
        let config = CommandChannelConfig {
            gathering_grace: grace,
            ..Default::default()
        };
        let mut client = CommandChannelClient::new(transport.clone(), config, Handle::current());
        let (tx, rx) = mpsc::unbounded_channel();
        let room = RoomConnectionParameters::new("UDID-0001", "secret");
        client.connect_to_room(room, SignalingEvents::new(tx));
        Self {
            client,
            transport,
            rx,
        }
    }

    fn relayed(transport: Arc<MockTransport>) -> (CommandChannelClient, mpsc::UnboundedReceiver<SessionInput>) {
        let mut client = CommandChannelClient::new(
            transport,
            CommandChannelConfig::default(),
            Handle::current(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let room = RoomConnectionParameters::new("UDID-0001", "secret").with_relay(RelayCredentials {
            token: "am-token".to_string(),
            realm: "realm-1".to_string(),
            info: Some("state".to_string()),
        });
        client.connect_to_room(room, SignalingEvents::new(tx));
        (client, rx)
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionInput>) -> SignalingEvent {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(SessionInput::Signaling(event))) => event,
        other => panic!("expected a signaling event, got {:?}", other),
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn local_candidate() -> IceCandidate {
    IceCandidate::new("0", 0, "candidate:7 1 udp 2122260223 10.0.0.2 50000 typ host")
}

#[tokio::test]
async fn test_direct_connection_reports_initiator() {
    let mut fx = Fixture::new(MockTransport::with_responses(&[]), Duration::from_secs(60));

    match next_event(&mut fx.rx).await {
        SignalingEvent::ConnectedToRoom(params) => {
            assert!(params.is_initiator());
            assert!(params.ice_servers.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        *fx.transport.opened.lock(),
        Some(("UDID-0001".to_string(), "secret".to_string()))
    );
    assert!(fx.transport.funcs().is_empty());
}

#[tokio::test]
async fn test_relay_start_builds_ice_server() {
    let transport = MockTransport::with_responses(&[RELAY_START]);
    let (_client, mut rx) = Fixture::relayed(transport.clone());

    match next_event(&mut rx).await {
        SignalingEvent::ConnectedToRoom(params) => {
            assert_eq!(params.ice_servers.len(), 1);
            assert_eq!(params.ice_servers[0].urls, vec!["turn:1.2.3.4:3478?transport=udp"]);
            assert_eq!(params.ice_servers[0].username, "user");
            assert_eq!(params.ice_servers[0].password, "pass");
        }
        other => panic!("unexpected {:?}", other),
    }

    let start = transport.request("startWebRTC");
    assert_eq!(start["args"]["am_token"], "am-token");
    assert_eq!(start["args"]["realm"], "realm-1");
    assert_eq!(start["args"]["info"], "state");
}

#[tokio::test]
async fn test_relay_start_failure_is_channel_error() {
    let transport = MockTransport::with_responses(&[r#"{"statusCode":403}"#]);
    let (_client, mut rx) = Fixture::relayed(transport);

    match next_event(&mut rx).await {
        SignalingEvent::ChannelError(reason) => assert!(reason.contains("403")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_open_failure_is_channel_error() {
    let transport = Arc::new(MockTransport {
        fail_open: true,
        ..Default::default()
    });
    let mut fx = Fixture::new(transport, Duration::from_secs(60));

    match next_event(&mut fx.rx).await {
        SignalingEvent::ChannelError(reason) => assert!(reason.contains("client new failed")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_offer_exchanged_when_gathering_completes() {
    let mut fx = Fixture::new(MockTransport::with_responses(&[ANSWER]), Duration::from_secs(60));
    assert!(matches!(next_event(&mut fx.rx).await, SignalingEvent::ConnectedToRoom(_)));

    fx.client.send_local_ice_candidate(&local_candidate());
    fx.client.send_offer_sdp(&SessionDescription::new(SdpType::Offer, OFFER));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!fx.client.offer_exchanged());

    fx.client.send_ice_gathering_state(IceGatheringState::Complete);
    match next_event(&mut fx.rx).await {
        SignalingEvent::RemoteDescription(answer) => {
            assert_eq!(answer.sdp_type, SdpType::Answer);
            assert!(answer.sdp.starts_with("v=0\r\n"));
            assert!(answer.sdp.ends_with("a=mid:0\r\n"));
        }
        other => panic!("unexpected {:?}", other),
    }
    match next_event(&mut fx.rx).await {
        SignalingEvent::RemoteIceCandidate(candidate) => {
            assert_eq!(candidate.sdp_mid, "0");
            assert!(candidate.sdp.starts_with("candidate:1 "));
        }
        other => panic!("unexpected {:?}", other),
    }

    let exchange = fx.transport.request("exchangeSdp");
    let sdp = exchange["args"]["sdp"].as_str().unwrap();
    assert_eq!(exchange["args"]["type"], "offer");
    assert!(exchange["args"].get("RTC_ID").is_none());
    assert!(!sdp.contains("ice-options"));
    assert_eq!(sdp.matches("a=candidate:7 ").count(), 2);

    fx.client.send_ice_gathering_state(IceGatheringState::Complete);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.transport.funcs(), vec!["exchangeSdp"]);
}

#[tokio::test]
async fn test_offer_exchanged_after_grace_period() {
    let mut fx = Fixture::new(MockTransport::with_responses(&[ANSWER]), Duration::from_millis(20));
    assert!(matches!(next_event(&mut fx.rx).await, SignalingEvent::ConnectedToRoom(_)));

    fx.client.send_offer_sdp(&SessionDescription::new(SdpType::Offer, OFFER));
    assert!(matches!(
        next_event(&mut fx.rx).await,
        SignalingEvent::RemoteDescription(_)
    ));
    assert!(fx.client.offer_exchanged());
}

#[tokio::test]
async fn test_rejected_exchange_stops_relay_session() {
    let transport = MockTransport::with_responses(&[
        RELAY_START,
        r#"{"statusCode":500}"#,
        r#"{"statusCode":200}"#,
    ]);
    let (mut client, mut rx) = Fixture::relayed(transport.clone());
    assert!(matches!(next_event(&mut rx).await, SignalingEvent::ConnectedToRoom(_)));

    client.send_ice_gathering_state(IceGatheringState::Complete);
    client.send_offer_sdp(&SessionDescription::new(SdpType::Offer, OFFER));

    match next_event(&mut rx).await {
        SignalingEvent::ChannelError(reason) => assert!(reason.contains("500")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(transport.funcs(), vec!["startWebRTC", "exchangeSdp", "stopWebRTC"]);
    assert_eq!(transport.request("exchangeSdp")["args"]["RTC_ID"], 12);
    assert_eq!(transport.request("stopWebRTC")["args"]["RTC_ID"], 12);
}

#[tokio::test]
async fn test_disconnect_stops_relay_session() {
    let transport = MockTransport::with_responses(&[RELAY_START, r#"{"statusCode":200}"#]);
    let (mut client, mut rx) = Fixture::relayed(transport.clone());
    assert!(matches!(next_event(&mut rx).await, SignalingEvent::ConnectedToRoom(_)));

    client.disconnect_from_room();
    wait_until(|| transport.funcs().len() == 2).await;
    assert_eq!(transport.request("stopWebRTC")["args"]["RTC_ID"], 12);

    client.send_offer_sdp(&SessionDescription::new(SdpType::Offer, OFFER));
    client.send_ice_gathering_state(IceGatheringState::Complete);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.funcs().len(), 2);
}
