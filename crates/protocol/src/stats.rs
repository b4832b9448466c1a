use serde::{Deserialize, Serialize};

/// A point-in-time snapshot published by `StatsSampler` (§4.6). Derived
/// state, reset whenever the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSample {
    pub fps: f32,
    pub rtt_ms: f64,
    pub bitrate_kbps: f64,
    pub packet_loss: f32,
    pub width: u32,
    pub height: u32,
    /// Normalized name (e.g. "HEVC" -> "H265"), not the raw SDP rtpmap name.
    pub codec: &'static str,
    pub input_ipc_ms: f64,
    pub input_send_ms: f64,
    pub input_total_ms: f64,
    pub input_rate_eps: f64,
}

impl StatsSample {
    /// Bitrate from a byte delta over a time window, per §4.6:
    /// `8 * delta_bytes / delta_seconds / 1000` kbps.
    pub fn bitrate_kbps_from_delta(delta_bytes: u64, delta_seconds: f64) -> f64 {
        if delta_seconds <= 0.0 {
            return 0.0;
        }
        8.0 * delta_bytes as f64 / delta_seconds / 1000.0
    }

    /// Normalize a raw SDP/stats codec name to the reporting name (§4.6).
    pub fn normalize_codec_name(raw: &str) -> &'static str {
        match raw.to_ascii_uppercase().as_str() {
            "HEVC" | "H265" => "H265",
            "AV1" => "AV1",
            _ => "H264",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_from_delta_matches_formula() {
        // 125_000 bytes over 1s = 1_000_000 bits/s = 1000 kbps.
        assert_eq!(StatsSample::bitrate_kbps_from_delta(125_000, 1.0), 1000.0);
    }

    #[test]
    fn bitrate_from_zero_elapsed_time_is_zero_not_nan() {
        assert_eq!(StatsSample::bitrate_kbps_from_delta(1000, 0.0), 0.0);
    }

    #[test]
    fn hevc_normalizes_to_h265() {
        assert_eq!(StatsSample::normalize_codec_name("HEVC"), "H265");
        assert_eq!(StatsSample::normalize_codec_name("hevc"), "H265");
    }

    #[test]
    fn unknown_codec_falls_back_to_h264() {
        assert_eq!(StatsSample::normalize_codec_name("VP9"), "H264");
    }
}
