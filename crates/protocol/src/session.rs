use serde::{Deserialize, Serialize};

/// Lifecycle status of a `Session` as reported by the GFN session API.
///
/// The wire representation is a small integer (see §6 of the core spec);
/// this type gives it a name and rejects anything else rather than silently
/// defaulting, since an unrecognized status is a sign the API changed under us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SessionStatus {
    Ended,
    Ready,
    Active,
    Queued,
}

impl TryFrom<u32> for SessionStatus {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SessionStatus::Ended),
            2 => Ok(SessionStatus::Ready),
            3 => Ok(SessionStatus::Active),
            6 => Ok(SessionStatus::Queued),
            other => Err(format!("unknown session status code {other}")),
        }
    }
}

impl From<SessionStatus> for u32 {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Ended => 0,
            SessionStatus::Ready => 2,
            SessionStatus::Active => 3,
            SessionStatus::Queued => 6,
        }
    }
}

/// Purpose of a `connection_info` entry, as returned by GET/PUT /session/{id}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ConnectionUsage {
    /// Primary media endpoint (audio/video/input).
    PrimaryMedia,
    /// Signaling endpoint; never a valid media target.
    Signaling,
    /// Fallback media endpoint, used only when no primary media entry exists.
    FallbackMedia,
}

impl TryFrom<u32> for ConnectionUsage {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ConnectionUsage::PrimaryMedia),
            14 => Ok(ConnectionUsage::Signaling),
            17 => Ok(ConnectionUsage::FallbackMedia),
            other => Err(format!("unknown connection usage code {other}")),
        }
    }
}

impl From<ConnectionUsage> for u32 {
    fn from(value: ConnectionUsage) -> Self {
        match value {
            ConnectionUsage::PrimaryMedia => 2,
            ConnectionUsage::Signaling => 14,
            ConnectionUsage::FallbackMedia => 17,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub ip: String,
    pub port: u16,
    pub usage: ConnectionUsage,
}

/// Video codec negotiated for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    /// The value this codec's name normalizes to in stats reporting (§4.6: "HEVC -> H265").
    pub fn normalized_name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
            VideoCodec::Av1 => "AV1",
        }
    }

    /// The SDP rtpmap encoding name this codec corresponds to.
    pub fn sdp_encoding_name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
            VideoCodec::Av1 => "AV1",
        }
    }
}

/// Immutable per-session streaming request, owned by the excluded settings
/// collaborator and handed to the core as a value (§6). The core makes no
/// assumption about how these were chosen or persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingOptions {
    pub app_id: u32,
    pub store_type: String,
    pub store_id: String,
    pub preferred_server: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: VideoCodec,
    pub max_bitrate_mbps: u32,
    pub reflex: bool,
}

/// A GFN streaming session, owned by `SessionController` and borrowed
/// read-mostly by `SignalingSession` (§3 Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub app_id: u32,
    pub status: SessionStatus,
    pub gpu_type: Option<String>,
    pub server_host: Option<String>,
    pub signaling_url: Option<String>,
    pub connection_info: Vec<ConnectionInfo>,
    pub queue_position: Option<u32>,
    pub eta_ms: Option<u64>,
}

impl Session {
    /// Resolve the media endpoint to dial, per the usage-17 fallback decision
    /// recorded in SPEC_FULL.md: `usage=2` wins whenever present; `usage=17`
    /// is accepted only in its absence. `usage=14` (signaling) is never
    /// returned here.
    pub fn primary_media(&self) -> Option<&ConnectionInfo> {
        self.connection_info
            .iter()
            .find(|c| c.usage == ConnectionUsage::PrimaryMedia)
            .or_else(|| {
                self.connection_info
                    .iter()
                    .find(|c| c.usage == ConnectionUsage::FallbackMedia)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(connection_info: Vec<ConnectionInfo>) -> Session {
        Session {
            session_id: "S".into(),
            app_id: 1,
            status: SessionStatus::Ready,
            gpu_type: None,
            server_host: Some("1-2-3-4.host".into()),
            signaling_url: Some("wss://1-2-3-4.host/nvst/".into()),
            connection_info,
            queue_position: None,
            eta_ms: None,
        }
    }

    #[test]
    fn status_roundtrips_through_wire_codes() {
        for (code, status) in [
            (0u32, SessionStatus::Ended),
            (2, SessionStatus::Ready),
            (3, SessionStatus::Active),
            (6, SessionStatus::Queued),
        ] {
            assert_eq!(SessionStatus::try_from(code).unwrap(), status);
            assert_eq!(u32::from(status), code);
        }
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        assert!(SessionStatus::try_from(99).is_err());
    }

    #[test]
    fn primary_media_prefers_usage_2() {
        let session = session_with(vec![
            ConnectionInfo { ip: "H".into(), port: 443, usage: ConnectionUsage::Signaling },
            ConnectionInfo { ip: "1.2.3.4".into(), port: 49000, usage: ConnectionUsage::PrimaryMedia },
        ]);
        let media = session.primary_media().unwrap();
        assert_eq!(media.ip, "1.2.3.4");
        assert_eq!(media.port, 49000);
    }

    #[test]
    fn primary_media_falls_back_to_usage_17_when_usage_2_absent() {
        // Scenario 2 from spec.md §8.
        let session = session_with(vec![
            ConnectionInfo { ip: "H".into(), port: 443, usage: ConnectionUsage::Signaling },
            ConnectionInfo { ip: "M".into(), port: 12345, usage: ConnectionUsage::FallbackMedia },
        ]);
        let media = session.primary_media().unwrap();
        assert_eq!(media.ip, "M");
        assert_eq!(media.port, 12345);
    }

    #[test]
    fn primary_media_never_resolves_to_signaling_usage() {
        let session = session_with(vec![
            ConnectionInfo { ip: "H".into(), port: 443, usage: ConnectionUsage::Signaling },
        ]);
        assert!(session.primary_media().is_none());
    }

    #[test]
    fn codec_normalizes_to_stats_friendly_name() {
        assert_eq!(VideoCodec::H265.normalized_name(), "H265");
        assert_eq!(VideoCodec::H264.normalized_name(), "H264");
        assert_eq!(VideoCodec::Av1.normalized_name(), "AV1");
    }
}
