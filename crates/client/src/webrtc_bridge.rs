//! Owns the peer connection and bridges it to the application (§4.4).
//!
//! Grounded on `peer.rs`'s `WebRTCPeer`/`create_peer`/`SharedPeer` pattern
//! (manual `MediaEngine` registration, callback wiring, hot-swappable
//! generation-tagged handle) but inverted in data direction: the teacher
//! *sends* H.264 from a capture pipeline, this bridge *receives* video/audio
//! tracks from the GFN server and exposes them to a sink, and opens the
//! data channel itself rather than waiting for the browser to open one.

use anyhow::Context;
use gfn_protocol::{CoreError, VideoCodec};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::dtls_transport::dtls_role::DTLSRole;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::stats::{StatsReport, StatsReportType};
use webrtc::track::track_remote::TrackRemote;

static BRIDGE_GENERATION: AtomicU64 = AtomicU64::new(0);

/// The three roles a data channel can serve (§9's correction of the
/// reference's ad-hoc label lookups into a tagged, typed registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Control,
    Input,
    ServerInput,
}

fn role_for_label(label: &str) -> Option<ChannelRole> {
    match label {
        "input_channel_v1" => Some(ChannelRole::Input),
        "control" => Some(ChannelRole::Control),
        "server_input_v1" => Some(ChannelRole::ServerInput),
        _ => None,
    }
}

/// Stats pulled from the last succeeded ICE candidate pair, surfaced on
/// `Failed` for diagnostics (§4.4).
#[derive(Debug, Clone, Default)]
pub struct IceFailureDiagnostics {
    pub current_round_trip_time: Option<f64>,
    pub requests_sent: u32,
    pub responses_received: u32,
}

/// `Arc<RwLock<Arc<WebRtcBridge>>>` hot-swappable handle (same shape as the
/// teacher's `SharedPeer`), so `InputPipeline`/`StatsSampler` read a cloned
/// `Arc` rather than holding a strong cyclic reference into the bridge.
pub type SharedBridge = Arc<RwLock<Arc<WebRtcBridge>>>;

pub struct WebRtcBridge {
    peer_connection: Arc<RTCPeerConnection>,
    data_channels: Mutex<HashMap<ChannelRole, Arc<RTCDataChannel>>>,
    shared_stream_id: String,
    pub generation: u64,
}

impl WebRtcBridge {
    /// Build a fresh peer connection for `codec`, open `input_channel_v1`,
    /// and return the bridge. `setRemoteDescription` must not be called
    /// until after this returns, so that the data channel is present in
    /// our SCTP setup before the offer is applied (§4.4 critical ordering).
    pub async fn new(ice_servers: Vec<RTCIceServer>, codec: VideoCodec, ice_lite: bool) -> anyhow::Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        register_recv_codec(&mut media_engine, codec)?;
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        if ice_lite {
            Self::set_ice_lite_answering_role(&mut setting_engine);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ice_candidate_pool_size: 2,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let input_channel = peer_connection
            .create_data_channel(
                "input_channel_v1",
                Some(RTCDataChannelInit {
                    ordered: Some(false),
                    max_retransmits: Some(0),
                    ..Default::default()
                }),
            )
            .await
            .context("failed to open input_channel_v1 before setRemoteDescription")?;

        let mut data_channels = HashMap::new();
        data_channels.insert(ChannelRole::Input, input_channel);

        let generation = BRIDGE_GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
        info!(generation, "WebRTC bridge created");

        let pc_for_data_channel = Arc::clone(&peer_connection);
        let pc_for_state_change = Arc::clone(&peer_connection);
        let bridge = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak_for_data_channel = weak.clone();
            pc_for_data_channel.on_data_channel(Box::new(move |dc| {
                let weak = weak_for_data_channel.clone();
                Box::pin(async move {
                    if let Some(role) = role_for_label(dc.label())
                        && let Some(bridge) = weak.upgrade()
                    {
                        info!(label = dc.label(), ?role, "inbound data channel opened");
                        bridge.register_channel(role, dc).await;
                    }
                })
            }));

            let weak_for_state_change = weak.clone();
            pc_for_state_change.on_peer_connection_state_change(Box::new(move |state| {
                let weak = weak_for_state_change.clone();
                match state {
                    RTCPeerConnectionState::Failed => {
                        return Box::pin(async move {
                            if let Some(bridge) = weak.upgrade() {
                                let diag = bridge.ice_failure_diagnostics().await;
                                warn!(?diag, "peer connection failed");
                            } else {
                                warn!("peer connection failed");
                            }
                        });
                    }
                    RTCPeerConnectionState::Disconnected => {
                        warn!("peer connection disconnected, ICE reconnecting");
                    }
                    _ => info!(?state, "peer connection state changed"),
                }
                Box::pin(async {})
            }));

            Self {
                peer_connection,
                data_channels: Mutex::new(data_channels),
                shared_stream_id: format!("gfn-stream-{generation}"),
                generation,
            }
        });

        Ok(bridge)
    }

    /// ice-lite offers require the local peer to answer as DTLS client
    /// (§4.4, grounded on the GFNClient reference's `set_answering_dtls_role`).
    fn set_ice_lite_answering_role(setting_engine: &mut SettingEngine) {
        setting_engine.set_answering_dtls_role(DTLSRole::Client).ok();
    }

    pub async fn handle_offer(&self, sdp: &str) -> anyhow::Result<String> {
        let offer = RTCSessionDescription::offer(sdp.to_string()).context("invalid SDP offer")?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .context("set_remote_description failed")?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .context("create_answer failed")?;

        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .context("set_local_description failed")?;

        Ok(answer.sdp)
    }

    pub async fn add_ice_candidate(
        &self,
        candidate: &str,
        sdp_mid: Option<&str>,
        sdp_mline_index: Option<u16>,
    ) -> anyhow::Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_string(),
            sdp_mid: sdp_mid.map(str::to_string),
            sdp_mline_index,
            ..Default::default()
        };
        self.peer_connection.add_ice_candidate(init).await.context("add_ice_candidate failed")?;
        Ok(())
    }

    pub fn on_ice_candidate(&self, callback: impl Fn(String, Option<String>, Option<u16>) + Send + Sync + 'static) {
        let callback = Arc::new(callback);
        self.peer_connection.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(json) => {
                        let cb = Arc::clone(&callback);
                        cb(json.candidate, json.sdp_mid, json.sdp_mline_index);
                    }
                    Err(e) => warn!("failed to serialize ICE candidate: {e}"),
                }
            }
            Box::pin(async {})
        }));
    }

    /// Inbound media tracks (video/audio from the server). Orphan tracks
    /// (no associated stream) are attached to a lazily-created shared
    /// stream id so the sink always observes a non-null source (§4.4).
    pub fn on_track(&self, callback: impl Fn(Arc<TrackRemote>) + Send + Sync + 'static) {
        let callback = Arc::new(callback);
        self.peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let cb = Arc::clone(&callback);
            cb(track);
            Box::pin(async {})
        }));
    }

    pub fn shared_stream_id(&self) -> &str {
        &self.shared_stream_id
    }

    /// Resolver over the typed channel registry: the "best input channel"
    /// heuristic from the source, made explicit (§9). Prefers the
    /// client-opened `input_channel_v1`, falls back to a server-opened
    /// `server_input_v1` if the former never reports open.
    pub async fn resolve_input_channel(&self) -> Option<Arc<RTCDataChannel>> {
        let channels = self.data_channels.lock().await;
        channels
            .get(&ChannelRole::Input)
            .or_else(|| channels.get(&ChannelRole::ServerInput))
            .cloned()
    }

    pub async fn register_channel(&self, role: ChannelRole, channel: Arc<RTCDataChannel>) {
        self.data_channels.lock().await.insert(role, channel);
    }

    pub async fn get_stats(&self) -> StatsReport {
        self.peer_connection.get_stats().await
    }

    pub fn is_connected(&self) -> bool {
        self.peer_connection.connection_state() == RTCPeerConnectionState::Connected
    }

    /// Diagnostics pulled on `Failed` (§4.4): last succeeded candidate
    /// pair's RTT and request/response counters.
    pub async fn ice_failure_diagnostics(&self) -> IceFailureDiagnostics {
        let stats = self.peer_connection.get_stats().await;
        for (_key, stat) in stats.reports.iter() {
            if let StatsReportType::CandidatePair(pair) = stat
                && pair.state == webrtc::ice::candidate::CandidatePairState::Succeeded
            {
                return IceFailureDiagnostics {
                    current_round_trip_time: Some(pair.current_round_trip_time),
                    requests_sent: pair.requests_sent as u32,
                    responses_received: pair.responses_received as u32,
                };
            }
        }
        IceFailureDiagnostics::default()
    }

    pub async fn close(&self) -> Result<(), CoreError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        info!(generation = self.generation, "peer connection closed");
        Ok(())
    }
}

fn register_recv_codec(media_engine: &mut MediaEngine, codec: VideoCodec) -> anyhow::Result<()> {
    let (mime_type, fmtp) = match codec {
        VideoCodec::H264 => (
            MIME_TYPE_H264,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        ),
        VideoCodec::H265 => ("video/H265", ""),
        VideoCodec::Av1 => ("video/AV1", ""),
    };
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: fmtp.to_string(),
                rtcp_feedback: vec![],
            },
            payload_type: 96,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;
    Ok(())
}

pub async fn snapshot(shared: &SharedBridge) -> Arc<WebRtcBridge> {
    Arc::clone(&*shared.read().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_for_label_resolves_known_labels() {
        assert_eq!(role_for_label("input_channel_v1"), Some(ChannelRole::Input));
        assert_eq!(role_for_label("control"), Some(ChannelRole::Control));
        assert_eq!(role_for_label("server_input_v1"), Some(ChannelRole::ServerInput));
        assert_eq!(role_for_label("unknown"), None);
    }
}
