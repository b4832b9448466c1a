use serde::{Deserialize, Serialize};

/// Identifying information the client announces about itself on connect,
/// and that the server echoes back (§3 `peer_info`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: u32,
    pub name: String,
    pub peer_role: u8,
    pub resolution: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(rename = "browserVersion", skip_serializing_if = "Option::is_none")]
    pub browser_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
}

/// The nested payload carried by a `peer_msg`'s `msg` field, itself JSON
/// serialized to a string rather than embedded as an object (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SdpPayload {
    Offer { sdp: String },
    Answer {
        sdp: String,
        #[serde(rename = "nvstSdp", skip_serializing_if = "Option::is_none")]
        nvst_sdp: Option<String>,
    },
}

/// An ICE candidate carried inside `peer_msg.msg` (no `type` tag — identified
/// by the presence of the `candidate` field instead, per the real protocol).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

/// The decoded shape of a `peer_msg.msg` nested JSON payload.
///
/// Untagged: an SDP payload is distinguished by its `type` field, a
/// candidate payload by the absence of one — matching the real wire
/// protocol, which has no shared envelope tag for the two.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PeerPayload {
    Sdp(SdpPayload),
    Candidate(CandidatePayload),
}

/// The outer `peer_msg` envelope: `{from, to, msg}` where `msg` is itself a
/// JSON-encoded string, not a nested object (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEnvelope {
    pub from: u32,
    pub to: u32,
    pub msg: String,
}

impl PeerEnvelope {
    pub fn new(from: u32, to: u32, payload: &PeerPayload) -> serde_json::Result<Self> {
        Ok(PeerEnvelope { from, to, msg: serde_json::to_string(payload)? })
    }

    pub fn payload(&self) -> serde_json::Result<PeerPayload> {
        serde_json::from_str(&self.msg)
    }
}

/// A message arriving on the signaling socket. The wire shape is a flat
/// packet of optional fields rather than a tagged enum — `ackid`,
/// `peer_info`, and `peer_msg` can all appear together on the first message,
/// for example — so this mirrors the real shape instead of forcing an
/// internally-tagged enum onto it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ackid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hb: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_info: Option<PeerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_msg: Option<PeerEnvelope>,
}

/// A message we originate. Same flat-optional shape as `ServerMessage`; kept
/// as a distinct type so the two directions can't be confused at the call
/// site even though the wire shape is symmetric.
pub type ClientMessage = ServerMessage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_payload_roundtrips_through_peer_envelope() {
        let payload = PeerPayload::Sdp(SdpPayload::Offer { sdp: "v=0\r\n...".into() });
        let envelope = PeerEnvelope::new(1, 2, &payload).unwrap();
        assert_eq!(envelope.from, 1);
        assert_eq!(envelope.to, 2);
        let parsed = envelope.payload().unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn answer_payload_carries_nvst_sdp_camel_case() {
        let payload = PeerPayload::Sdp(SdpPayload::Answer {
            sdp: "v=0\r\nanswer".into(),
            nvst_sdp: Some("a=general.icePassword:x".into()),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""nvstSdp""#));
        assert!(!json.contains("nvst_sdp"));
    }

    #[test]
    fn candidate_payload_has_no_type_tag() {
        let payload = PeerPayload::Candidate(CandidatePayload {
            candidate: "candidate:1 1 udp 2130706431 1.2.3.4 49000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains(r#""type""#));
        assert!(json.contains("sdpMid"));
        assert!(json.contains("sdpMLineIndex"));
    }

    #[test]
    fn peer_msg_payload_disambiguates_offer_from_candidate() {
        let offer_json = r#"{"type":"offer","sdp":"v=0"}"#;
        let offer: PeerPayload = serde_json::from_str(offer_json).unwrap();
        assert!(matches!(offer, PeerPayload::Sdp(SdpPayload::Offer { .. })));

        let candidate_json = r#"{"candidate":"candidate:1 1 udp 1 1.1.1.1 1 typ host"}"#;
        let candidate: PeerPayload = serde_json::from_str(candidate_json).unwrap();
        assert!(matches!(candidate, PeerPayload::Candidate(_)));
    }

    #[test]
    fn server_message_with_ackid_and_peer_info_together() {
        let json = r#"{"ackid":1,"peer_info":{"id":1,"name":"peer-1","peer_role":0,"resolution":"1920x1080","version":2}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.ackid, Some(1));
        assert!(msg.peer_info.is_some());
        assert!(msg.peer_msg.is_none());
    }

    #[test]
    fn heartbeat_message_is_just_hb() {
        let json = r#"{"hb":1}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.hb, Some(1));
        assert!(msg.ackid.is_none());
    }

    #[test]
    fn ack_message_serializes_minimally() {
        let msg = ServerMessage { ack: Some(42), ..Default::default() };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"ack":42}"#);
    }
}
