use thiserror::Error;

/// The stable error taxonomy surfaced to session observers.
///
/// Every variant carries a machine-readable `code()`; UI-facing text is the
/// caller's responsibility, not this type's.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    /// The JWT is missing or was rejected by the session API.
    #[error("authentication rejected")]
    AuthInvalid,

    /// Server responded with a `REGION_NOT_SUPPORTED*` code for this game/region pair.
    #[error("region not supported: {detail}")]
    RegionUnsupported { detail: String },

    /// Another session is already active for this account.
    #[error("session limit exceeded")]
    SessionLimitExceeded,

    /// The 5-minute ready-poll ceiling elapsed.
    #[error("timed out waiting for session to become ready")]
    QueueTimeout,

    /// The signaling socket closed before the answer was sent.
    #[error("signaling socket closed (code {code}): {reason}")]
    SignalingClosed { code: u16, reason: String },

    /// The peer connection entered the `failed` ICE state.
    #[error("ICE connection failed, last RTT {last_rtt_ms:?}ms")]
    IceFailed { last_rtt_ms: Option<f64> },

    /// The server did not send the input handshake within 10s of channel open.
    #[error("input handshake timed out")]
    InputHandshakeTimeout,

    /// Retryable; callers decide whether/how to retry based on context.
    #[error("transient error: {0}")]
    Transient(String),
}

impl CoreError {
    /// Stable machine code, independent of the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::AuthInvalid => "AUTH_INVALID",
            CoreError::RegionUnsupported { .. } => "REGION_UNSUPPORTED",
            CoreError::SessionLimitExceeded => "SESSION_LIMIT_EXCEEDED",
            CoreError::QueueTimeout => "QUEUE_TIMEOUT",
            CoreError::SignalingClosed { .. } => "SIGNALING_CLOSED",
            CoreError::IceFailed { .. } => "ICE_FAILED",
            CoreError::InputHandshakeTimeout => "INPUT_HANDSHAKE_TIMEOUT",
            CoreError::Transient(_) => "TRANSIENT",
        }
    }

    /// Whether a caller may retry this error without giving up on the session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::AuthInvalid.code(), "AUTH_INVALID");
        assert_eq!(CoreError::SessionLimitExceeded.code(), "SESSION_LIMIT_EXCEEDED");
        assert_eq!(CoreError::QueueTimeout.code(), "QUEUE_TIMEOUT");
        assert_eq!(CoreError::InputHandshakeTimeout.code(), "INPUT_HANDSHAKE_TIMEOUT");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(CoreError::Transient("net blip".into()).is_retryable());
        assert!(!CoreError::AuthInvalid.is_retryable());
        assert!(!CoreError::QueueTimeout.is_retryable());
    }
}
