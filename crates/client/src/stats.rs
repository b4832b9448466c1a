//! StatsSampler (§4.6): polls the peer connection once a second, derives
//! bitrate/RTT/codec, and publishes a `StatsSample` to observers. Grounded on
//! `webrtc_bridge::WebRtcBridge::get_stats`/`ice_failure_diagnostics` for the
//! stats-report shape and on `gfn_protocol::StatsSample` for the derivation
//! formulas (bitrate-from-delta, codec normalization).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gfn_protocol::{StatsSample, VideoCodec};
use tokio::sync::Mutex;
use tracing::debug;
use webrtc::stats::{ICECandidatePairStats, StatsReport, StatsReportType};

use crate::input::InputLatency;
use crate::webrtc_bridge::SharedBridge;

/// Receives each sample as it's produced. Implemented by the application
/// shell (UI overlay, logging sink, ...).
pub trait StatsObserver: Send + Sync {
    fn on_stats(&self, sample: StatsSample);
}

struct PrevSample {
    bytes_received: u64,
    instant: tokio::time::Instant,
}

/// Polls `bridge` on a 1s cadence until the peer connection closes.
pub struct StatsSampler {
    bridge: SharedBridge,
    width: u32,
    height: u32,
    codec: VideoCodec,
    latency: Arc<Mutex<InputLatency>>,
    running: AtomicBool,
}

impl StatsSampler {
    pub fn new(bridge: SharedBridge, width: u32, height: u32, codec: VideoCodec, latency: Arc<Mutex<InputLatency>>) -> Arc<Self> {
        Arc::new(Self { bridge, width, height, codec, latency, running: AtomicBool::new(true) })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Runs until `stop()` is called or the bridge's peer connection closes.
    pub async fn run(&self, observer: &dyn StatsObserver) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        let mut prev: Option<PrevSample> = None;

        while self.running.load(Ordering::Acquire) {
            interval.tick().await;

            let bridge = crate::webrtc_bridge::snapshot(&self.bridge).await;
            if !bridge.is_connected() {
                debug!("stats sampler stopping: peer connection no longer connected");
                break;
            }

            let report = bridge.get_stats().await;
            let now = tokio::time::Instant::now();
            let bytes_received = inbound_video_bytes_received(&report);

            let bitrate_kbps = match (&prev, bytes_received) {
                (Some(p), Some(bytes)) => {
                    let delta_bytes = bytes.saturating_sub(p.bytes_received);
                    let delta_seconds = (now - p.instant).as_secs_f64();
                    StatsSample::bitrate_kbps_from_delta(delta_bytes, delta_seconds)
                }
                _ => 0.0,
            };
            if let Some(bytes) = bytes_received {
                prev = Some(PrevSample { bytes_received: bytes, instant: now });
            }

            let rtt_ms = succeeded_candidate_pair(&report)
                .map(|pair| pair.current_round_trip_time * 1000.0)
                .unwrap_or(0.0);
            let packet_loss = remote_inbound_fraction_lost(&report).unwrap_or(0.0) as f32;

            let latency = *self.latency.lock().await;

            observer.on_stats(StatsSample {
                fps: 0.0,
                rtt_ms,
                bitrate_kbps,
                packet_loss,
                width: self.width,
                height: self.height,
                codec: self.codec.normalized_name(),
                input_ipc_ms: latency.ipc_ms,
                input_send_ms: latency.send_ms,
                input_total_ms: latency.total_ms,
                input_rate_eps: latency.events_per_second,
            });
        }
    }
}

fn inbound_video_bytes_received(report: &StatsReport) -> Option<u64> {
    report.reports.values().find_map(|entry| match entry {
        StatsReportType::InboundRTP(stats) if stats.kind == "video" => Some(stats.bytes_received),
        _ => None,
    })
}

fn succeeded_candidate_pair(report: &StatsReport) -> Option<&ICECandidatePairStats> {
    report.reports.values().find_map(|entry| match entry {
        StatsReportType::CandidatePair(pair) if pair.state == webrtc::ice::candidate::CandidatePairState::Succeeded => Some(pair),
        _ => None,
    })
}

fn remote_inbound_fraction_lost(report: &StatsReport) -> Option<f64> {
    report.reports.values().find_map(|entry| match entry {
        StatsReportType::RemoteInboundRTP(stats) => Some(stats.fraction_lost),
        _ => None,
    })
}
