//! `StreamingCore` (§9 Design Notes): a single value owned by `main`, holding
//! the session controller, the active session, the WebRTC bridge, and the
//! stats sampler. Replaces the module-level statics and the channel-heavy
//! event loop of the teacher's `main.rs` with one value and one
//! `tokio::select!` driven from it.

use std::sync::Arc;
use std::time::Duration;

use gfn_protocol::{CoreError, IceConfig, Session, StreamingOptions, TlsConfig};
use tokio::sync::{mpsc, Mutex as TokioMutex, RwLock};
use tracing::{info, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::input::{InputLatency, InputPipeline};
use crate::session_controller::{QueueObserver, SessionController};
use crate::sdp::{build_nvst_sdp, extract_ice_params, filter_video_codec};
use crate::signaling::{self, SignalingCommand, SignalingEvent, SignalingSession};
use crate::stats::{StatsObserver, StatsSampler};
use crate::webrtc_bridge::{SharedBridge, WebRtcBridge};

/// Receives inbound media tracks once the bridge has resolved them to a
/// shared stream id (§4.4's "video sink must always see a non-null source").
/// The excluded UI layer implements this to hand tracks to a decoder.
pub trait VideoSink: Send + Sync {
    fn on_track(&self, track: Arc<webrtc::track::track_remote::TrackRemote>, stream_id: &str);
}

/// Logs the track's kind, codec, and assigned stream id; the excluded UI
/// layer would swap this for an actual decoder/renderer.
pub struct LoggingVideoSink;

impl VideoSink for LoggingVideoSink {
    fn on_track(&self, track: Arc<webrtc::track::track_remote::TrackRemote>, stream_id: &str) {
        info!(kind = %track.kind(), codec = %track.codec().capability.mime_type, stream_id, "inbound media track");
    }
}

/// Logs every queue update at info level; the excluded UI layer would swap
/// this for a progress bar.
pub struct LoggingQueueObserver;

impl QueueObserver for LoggingQueueObserver {
    fn on_queue_update(&self, position: Option<u32>, eta_ms: Option<u64>) {
        info!(?position, ?eta_ms, "queued for session");
    }
}

/// Logs every sample at debug level; the excluded UI layer would forward
/// this to an overlay instead.
pub struct LoggingStatsObserver;

impl StatsObserver for LoggingStatsObserver {
    fn on_stats(&self, sample: gfn_protocol::StatsSample) {
        tracing::debug!(
            rtt_ms = sample.rtt_ms,
            bitrate_kbps = sample.bitrate_kbps,
            packet_loss = sample.packet_loss,
            codec = sample.codec,
            "stats sample"
        );
    }
}

pub struct StreamingCore {
    session_controller: SessionController,
    pub session: Session,
    pub bridge: SharedBridge,
    pub stats: Arc<StatsSampler>,
    pub input_pipeline: Arc<InputPipeline>,
    pub latency: Arc<TokioMutex<InputLatency>>,
}

impl StreamingCore {
    /// Drives the session lifecycle end to end (§4.1, §4.2, §4.4): start,
    /// wait for ready, claim the GPU, open signaling, negotiate WebRTC, and
    /// arm the input pipeline. Returns once the input channel is open and
    /// ready to receive the server's handshake.
    pub async fn connect(
        session_controller: SessionController,
        options: &StreamingOptions,
        ice_config: &IceConfig,
        tls_config: &TlsConfig,
    ) -> Result<(Self, mpsc::Receiver<SignalingEvent>, mpsc::Sender<SignalingCommand>), CoreError> {
        let session = session_controller.start(options).await?;
        let session = session_controller.wait_ready(&session.session_id, session.app_id, &LoggingQueueObserver).await?;
        let session = session_controller
            .claim(&session.session_id, session.app_id, options.width, options.height, options.fps)
            .await?;

        let host = session
            .server_host
            .clone()
            .or_else(|| session.signaling_url.as_deref().and_then(|u| url::Url::parse(u).ok()?.host_str().map(str::to_string)))
            .ok_or_else(|| CoreError::Transient("session has no signaling host".into()))?;

        let signaling_session = SignalingSession::new(&host, false, tls_config.root_cert_override.clone());
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let session_id_for_task = session.session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = signaling_session.run(&session_id_for_task, event_tx, cmd_rx).await {
                warn!("signaling session ended: {e}");
            }
        });

        let offer_sdp = tokio::time::timeout(Duration::from_secs(15), async {
            loop {
                match event_rx.recv().await {
                    Some(SignalingEvent::OfferReceived(sdp)) => return Some(sdp),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .map_err(|_| CoreError::Transient("signaling handshake timed out".into()))?
        .ok_or_else(|| CoreError::SignalingClosed { code: 1006, reason: "closed before offer".into() })?;

        let ice_lite = signaling::is_ice_lite(&offer_sdp);

        let bridge = WebRtcBridge::new(ice_servers_from(ice_config), options.codec, ice_lite)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let cmd_tx_for_ice = cmd_tx.clone();
        bridge.on_ice_candidate(move |candidate, sdp_mid, sdp_mline_index| {
            let cmd_tx = cmd_tx_for_ice.clone();
            let _ = cmd_tx.try_send(SignalingCommand::SendLocalCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index: sdp_mline_index.map(u32::from),
            });
        });

        let video_sink: Arc<dyn VideoSink> = Arc::new(LoggingVideoSink);
        let stream_id_for_track = bridge.shared_stream_id().to_string();
        bridge.on_track(move |track| {
            video_sink.on_track(track, &stream_id_for_track);
        });

        let answer_sdp = bridge.handle_offer(&offer_sdp).await.map_err(|e| CoreError::Transient(e.to_string()))?;
        let answer_sdp = filter_video_codec(&answer_sdp, options.codec.sdp_encoding_name());
        let ice_params = extract_ice_params(&answer_sdp);
        let nvst_sdp = build_nvst_sdp(&ice_params, options.width, options.height, options.fps, options.max_bitrate_mbps * 1000);

        cmd_tx
            .send(SignalingCommand::SendAnswer { sdp: answer_sdp, nvst_sdp })
            .await
            .map_err(|_| CoreError::SignalingClosed { code: 1006, reason: "command channel closed".into() })?;

        if ice_lite {
            arm_ice_lite_fallback(&bridge, &host, &offer_sdp, cmd_tx.clone());
        }

        let shared_bridge: SharedBridge = Arc::new(RwLock::new(bridge));

        let remote_event_tx_for_trickle = cmd_tx.clone();
        let bridge_for_trickle = Arc::clone(&shared_bridge);
        let mut remote_events = event_rx;
        let (forward_tx, forward_rx) = mpsc::channel(32);
        tokio::spawn(async move {
            while let Some(event) = remote_events.recv().await {
                match event {
                    SignalingEvent::RemoteCandidate(candidate) => {
                        let bridge = crate::webrtc_bridge::snapshot(&bridge_for_trickle).await;
                        if let Err(e) = bridge
                            .add_ice_candidate(&candidate.candidate, candidate.sdp_mid.as_deref(), candidate.sdp_mline_index.map(|i| i as u16))
                            .await
                        {
                            warn!("failed to add remote ICE candidate: {e}");
                        }
                    }
                    SignalingEvent::ClosedAfterAnswer => {
                        info!("signaling socket closed after answer (benign for ice-lite)");
                    }
                    other => {
                        let _ = forward_tx.send(other).await;
                    }
                }
            }
        });
        let _ = remote_event_tx_for_trickle;

        let input_channel = wait_for_input_channel(&shared_bridge).await.ok_or(CoreError::InputHandshakeTimeout)?;
        let latency = Arc::new(TokioMutex::new(InputLatency::default()));
        let input_pipeline = InputPipeline::new(input_channel, Arc::clone(&latency));
        input_pipeline.install_handshake_handler();

        let stats = StatsSampler::new(Arc::clone(&shared_bridge), options.width, options.height, options.codec, Arc::clone(&latency));

        Ok((
            Self { session_controller, session, bridge: shared_bridge, stats, input_pipeline, latency },
            forward_rx,
            cmd_tx,
        ))
    }

    pub async fn terminate(&self) {
        self.stats.stop();
        let bridge = crate::webrtc_bridge::snapshot(&self.bridge).await;
        if let Err(e) = bridge.close().await {
            warn!("error closing peer connection during terminate: {e}");
        }
        self.session_controller.terminate(&self.session.session_id).await;
    }
}

/// §6 lists no ice-server payload in the session API's response shape; GFN
/// edges resolve connectivity via the ice-lite host candidate instead. These
/// come entirely from local config (`ice.stun_urls`/`ice.turn_urls`) as a
/// fallback/override for local testing and restrictive networks.
fn ice_servers_from(ice_config: &IceConfig) -> Vec<RTCIceServer> {
    let mut servers = Vec::new();
    if !ice_config.stun_urls.is_empty() {
        servers.push(RTCIceServer { urls: ice_config.stun_urls.clone(), ..Default::default() });
    }
    if !ice_config.turn_urls.is_empty() {
        servers.push(RTCIceServer {
            urls: ice_config.turn_urls.clone(),
            username: ice_config.turn_username.clone().unwrap_or_default(),
            credential: ice_config.turn_credential.clone().unwrap_or_default(),
        });
    }
    servers
}

async fn wait_for_input_channel(bridge: &SharedBridge) -> Option<Arc<webrtc::data_channel::RTCDataChannel>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = crate::webrtc_bridge::snapshot(bridge).await;
        if let Some(channel) = snapshot.resolve_input_channel().await {
            return Some(channel);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// ICE-lite workaround (§4.2): if no remote candidate arrives within a short
/// window after the answer is sent, synthesize a host candidate from the
/// hostname-as-dotted-quad and the offer's media port, trying sdpMid 0..3.
fn arm_ice_lite_fallback(bridge: &Arc<WebRtcBridge>, host: &str, offer_sdp: &str, _cmd_tx: mpsc::Sender<SignalingCommand>) {
    let Some(ip) = signaling::parse_ice_lite_hostname(host) else {
        warn!(host, "ice-lite offer but hostname isn't a dotted-quad literal, skipping synthetic candidate");
        return;
    };
    let Some(port) = signaling::extract_media_port(offer_sdp) else {
        warn!("ice-lite offer has no m=video/audio port, skipping synthetic candidate");
        return;
    };
    let candidate = signaling::build_synthetic_candidate(ip, port);
    let bridge = Arc::clone(bridge);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        for sdp_mid in ["0", "1", "2", "3"] {
            match bridge.add_ice_candidate(&candidate, Some(sdp_mid), None).await {
                Ok(()) => {
                    info!(sdp_mid, "ice-lite synthetic candidate accepted");
                    return;
                }
                Err(e) => warn!(sdp_mid, "ice-lite synthetic candidate rejected: {e}"),
            }
        }
        warn!("ice-lite synthetic candidate rejected for all sdpMid values 0-3");
    });
}
