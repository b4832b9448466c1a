//! GFN WebSocket signaling (§4.2): `peer_info` → offer → answer → trickle
//! ICE. Grounded on `examples/other_examples/.../webrtc-signaling.rs.rs` for
//! the ack/heartbeat discipline and connect URL shape, and on
//! `frecar-beam`'s `signaling::run_signaling`/`build_tls_connector` for the
//! TLS connector and reconnect-with-backoff loop.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use gfn_protocol::{CandidatePayload, CoreError, PeerEnvelope, PeerInfo, PeerPayload, SdpPayload, ServerMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const PEER_ID_SELF: u32 = 2;
const PEER_ID_SERVER: u32 = 1;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Explicit signaling state machine (§4.2, §9 "coroutine/async control flow"
/// redesign note: one event receiver, no nested awaits inside an onmessage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Opened,
    PeerInfoAcked,
    AwaitingOffer,
    AnswerSent,
    Trickling,
    Heartbeating,
}

/// What the signaling loop hands back to the caller as it progresses.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    OfferReceived(String),
    RemoteCandidate(CandidatePayload),
    /// Socket closed after the answer was sent; non-fatal for ice-lite
    /// servers per §4.2/§7 ("Failure").
    ClosedAfterAnswer,
}

/// Commands the caller issues back into the socket once it has driven the
/// WebRTC side of the exchange.
#[derive(Debug, Clone)]
pub enum SignalingCommand {
    SendAnswer { sdp: String, nvst_sdp: String },
    SendLocalCandidate { candidate: String, sdp_mid: Option<String>, sdp_mline_index: Option<u32> },
}

pub struct SignalingSession {
    url: String,
    root_cert_override: Option<String>,
}

impl SignalingSession {
    /// Builds the `wss://{host}/nvst/sign_in?peer_id=...&version=2` URL with
    /// subprotocol `x-nv-sessionid.{session_id}` (§4.2, §6). `root_cert_override`
    /// is `tls.root_cert_override` from local config: an extra trusted root,
    /// appended to the native root store, for pinned-cert test deployments.
    pub fn new(host: &str, reconnect: bool, root_cert_override: Option<String>) -> Self {
        let rand_suffix: u64 = rand::random::<u64>() % 10_000_000_000;
        let reconnect_param = if reconnect { "&reconnect=1" } else { "" };
        let url = format!("wss://{host}/nvst/sign_in?peer_id=peer-{rand_suffix}{reconnect_param}&version=2");
        Self { url, root_cert_override }
    }

    /// Runs one connection attempt end to end, driving `event_tx`/`cmd_rx`
    /// until the socket closes or a fatal error occurs.
    pub async fn run(
        &self,
        session_id: &str,
        event_tx: mpsc::Sender<SignalingEvent>,
        mut cmd_rx: mpsc::Receiver<SignalingCommand>,
    ) -> Result<(), CoreError> {
        let subprotocol = format!("x-nv-sessionid.{session_id}");
        let connector = build_tls_connector(self.root_cert_override.as_deref()).map_err(|e| CoreError::Transient(e.to_string()))?;
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(2 * 1024 * 1024);

        let request = http::Request::builder()
            .uri(&self.url)
            .header("Host", host_of(&self.url))
            .header("Sec-WebSocket-Protocol", &subprotocol)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", tokio_tungstenite::tungstenite::handshake::client::generate_key())
            .body(())
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let (ws_stream, _) = tokio_tungstenite::connect_async_tls_with_config(request, Some(ws_config), false, Some(connector))
            .await
            .map_err(|e| CoreError::SignalingClosed { code: 1006, reason: e.to_string() })?;

        info!(url = %self.url, "signaling socket connected");
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let mut state = SignalingState::Opened;
        let mut next_ackid: u64 = 1;
        let mut answer_sent = false;

        send_client_message(&mut ws_tx, ServerMessage {
            ackid: Some(next_ackid),
            peer_info: Some(self_peer_info()),
            ..Default::default()
        }).await.map_err(|e| CoreError::SignalingClosed { code: 1006, reason: e.to_string() })?;
        next_ackid += 1;
        debug!(?state, "sent peer_info");

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; discard

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    send_client_message(&mut ws_tx, ServerMessage { hb: Some(1), ..Default::default() }).await
                        .map_err(|e| CoreError::SignalingClosed { code: 1006, reason: e.to_string() })?;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SignalingCommand::SendAnswer { sdp, nvst_sdp }) => {
                            let payload = PeerPayload::Sdp(SdpPayload::Answer { sdp, nvst_sdp: Some(nvst_sdp) });
                            let envelope = PeerEnvelope::new(PEER_ID_SELF, PEER_ID_SERVER, &payload)
                                .map_err(|e| CoreError::Transient(e.to_string()))?;
                            send_client_message(&mut ws_tx, ServerMessage {
                                ackid: Some(next_ackid),
                                peer_msg: Some(envelope),
                                ..Default::default()
                            }).await.map_err(|e| CoreError::SignalingClosed { code: 1006, reason: e.to_string() })?;
                            next_ackid += 1;
                            state = SignalingState::AnswerSent;
                            answer_sent = true;
                            debug!(?state, "sent answer");
                        }
                        Some(SignalingCommand::SendLocalCandidate { candidate, sdp_mid, sdp_mline_index }) => {
                            let payload = PeerPayload::Candidate(CandidatePayload { candidate, sdp_mid, sdp_mline_index });
                            let envelope = PeerEnvelope::new(PEER_ID_SELF, PEER_ID_SERVER, &payload)
                                .map_err(|e| CoreError::Transient(e.to_string()))?;
                            send_client_message(&mut ws_tx, ServerMessage {
                                ackid: Some(next_ackid),
                                peer_msg: Some(envelope),
                                ..Default::default()
                            }).await.map_err(|e| CoreError::SignalingClosed { code: 1006, reason: e.to_string() })?;
                            next_ackid += 1;
                            state = SignalingState::Trickling;
                        }
                        None => {
                            // Caller dropped the command side; keep draining inbound only.
                        }
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let parsed: ServerMessage = match serde_json::from_str(&text) {
                                Ok(m) => m,
                                Err(e) => { warn!("invalid signaling message: {e}"); continue; }
                            };
                            self_handle_inbound(&parsed, &mut ws_tx).await
                                .map_err(|e| CoreError::SignalingClosed { code: 1006, reason: e.to_string() })?;

                            if let Some(info) = &parsed.peer_info
                                && info.id != PEER_ID_SELF
                                && state == SignalingState::Opened
                            {
                                state = SignalingState::PeerInfoAcked;
                            }
                            if let Some(envelope) = &parsed.peer_msg
                                && let Ok(payload) = envelope.payload()
                            {
                                match payload {
                                    PeerPayload::Sdp(SdpPayload::Offer { sdp }) => {
                                        state = SignalingState::AwaitingOffer;
                                        if event_tx.send(SignalingEvent::OfferReceived(sdp)).await.is_err() {
                                            return Ok(());
                                        }
                                    }
                                    PeerPayload::Candidate(candidate) => {
                                        if event_tx.send(SignalingEvent::RemoteCandidate(candidate)).await.is_err() {
                                            return Ok(());
                                        }
                                    }
                                    PeerPayload::Sdp(SdpPayload::Answer { .. }) => {}
                                }
                            }
                            if parsed.hb.is_some() {
                                state = SignalingState::Heartbeating;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame.map(|f| (f.code.into(), f.reason.to_string())).unwrap_or((1006, String::new()));
                            if answer_sent {
                                let _ = event_tx.send(SignalingEvent::ClosedAfterAnswer).await;
                                return Ok(());
                            }
                            return Err(CoreError::SignalingClosed { code, reason });
                        }
                        None => {
                            let (code, reason) = (1006u16, String::new());
                            if answer_sent {
                                // Post-answer close: benign for ice-lite servers (§7, §9 open question).
                                let _ = event_tx.send(SignalingEvent::ClosedAfterAnswer).await;
                                return Ok(());
                            }
                            return Err(CoreError::SignalingClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            return Err(CoreError::SignalingClosed { code: 1006, reason: e.to_string() });
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

async fn self_handle_inbound<S>(msg: &ServerMessage, ws_tx: &mut S) -> anyhow::Result<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    // Ack discipline (§4.2/§5): every incoming ackid whose embedded peer id is
    // not our own gets a reply ack, emitted before anything else we send.
    if let Some(ackid) = msg.ackid {
        let is_our_own = msg.peer_info.as_ref().map(|p| p.id) == Some(PEER_ID_SELF);
        if !is_our_own {
            let ack = ServerMessage { ack: Some(ackid), ..Default::default() };
            ws_tx.send(Message::Text(serde_json::to_string(&ack)?.into())).await?;
        }
    }
    if msg.hb.is_some() {
        let hb = ServerMessage { hb: Some(1), ..Default::default() };
        ws_tx.send(Message::Text(serde_json::to_string(&hb)?.into())).await?;
    }
    Ok(())
}

async fn send_client_message<S>(ws_tx: &mut S, msg: ServerMessage) -> anyhow::Result<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    ws_tx.send(Message::Text(serde_json::to_string(&msg)?.into())).await?;
    Ok(())
}

fn self_peer_info() -> PeerInfo {
    PeerInfo {
        id: PEER_ID_SELF,
        name: format!("peer-{}", rand::random::<u64>() % 10_000_000_000),
        peer_role: 0,
        resolution: "1920x1080".into(),
        version: 2,
        browser: Some("Chrome".into()),
        browser_version: Some("131".into()),
        connected: Some(true),
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default()
}

fn build_tls_connector(root_cert_override: Option<&str>) -> anyhow::Result<tokio_tungstenite::Connector> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().expect("could not load platform certs") {
        let _ = root_store.add(cert);
    }
    if let Some(path) = root_cert_override {
        let pem = std::fs::read(path).with_context(|| format!("failed to read tls.root_cert_override '{path}'"))?;
        let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("failed to parse tls.root_cert_override '{path}' as PEM"))?;
        for cert in certs {
            root_store.add(cert).with_context(|| "failed to add override root certificate")?;
        }
        info!(path, "added override root certificate to signaling TLS trust store");
    }
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(tokio_tungstenite::Connector::Rustls(Arc::new(tls_config)))
}

/// ICE-lite synthetic candidate construction (§4.2 workaround). The server
/// hostname is `a-b-c-d.cloudmatchbeta.nvidiagrid.net` where `a-b-c-d` is the
/// IPv4 literal with dots replaced by dashes.
pub fn parse_ice_lite_hostname(hostname: &str) -> Option<Ipv4Addr> {
    let label = hostname.split('.').next()?;
    let octets: Vec<&str> = label.split('-').collect();
    if octets.len() != 4 {
        return None;
    }
    let mut parsed = [0u8; 4];
    for (i, octet) in octets.iter().enumerate() {
        parsed[i] = octet.parse().ok()?;
    }
    Some(Ipv4Addr::from(parsed))
}

/// The port from the first `m=video` or `m=audio` line in an SDP (§4.2).
pub fn extract_media_port(sdp: &str) -> Option<u16> {
    sdp.lines().find_map(|line| {
        let rest = line.strip_prefix("m=video ").or_else(|| line.strip_prefix("m=audio "))?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Whether the offer SDP declares ice-lite (§4.2).
pub fn is_ice_lite(sdp: &str) -> bool {
    sdp.lines().any(|line| line.trim() == "a=ice-lite")
}

/// Builds the synthetic host candidate SDP string the offer's ice-lite flag
/// requires when no remote candidate is trickled in time (§4.2).
pub fn build_synthetic_candidate(ip: Ipv4Addr, port: u16) -> String {
    format!("candidate:1 1 udp 2130706431 {ip} {port} typ host")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ice_lite_hostname_into_dotted_quad() {
        assert_eq!(
            parse_ice_lite_hostname("34-123-45-6.cloudmatchbeta.nvidiagrid.net"),
            Some(Ipv4Addr::new(34, 123, 45, 6))
        );
    }

    #[test]
    fn rejects_hostname_without_four_octets() {
        assert_eq!(parse_ice_lite_hostname("notadotted.host.net"), None);
    }

    #[test]
    fn rejects_hostname_with_non_numeric_octet() {
        assert_eq!(parse_ice_lite_hostname("a-b-c-d.cloudmatchbeta.nvidiagrid.net"), None);
    }

    #[test]
    fn extracts_video_media_port() {
        let sdp = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\nm=video 49000 RTP/AVP 96\r\n";
        assert_eq!(extract_media_port(sdp), Some(49000));
    }

    #[test]
    fn extracts_audio_media_port_when_no_video_line() {
        let sdp = "v=0\r\nm=audio 5000 RTP/AVP 0\r\n";
        assert_eq!(extract_media_port(sdp), Some(5000));
    }

    #[test]
    fn detects_ice_lite_flag() {
        assert!(is_ice_lite("v=0\r\na=ice-lite\r\nm=video 1 RTP/AVP 96\r\n"));
        assert!(!is_ice_lite("v=0\r\nm=video 1 RTP/AVP 96\r\n"));
    }

    #[test]
    fn builds_synthetic_host_candidate() {
        let candidate = build_synthetic_candidate(Ipv4Addr::new(1, 2, 3, 4), 49000);
        assert_eq!(candidate, "candidate:1 1 udp 2130706431 1.2.3.4 49000 typ host");
    }
}
