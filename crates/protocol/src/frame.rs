use thiserror::Error;

/// Errors from decoding bytes that originated on the wire (server-controlled).
/// Encoding our own events never fails — malformed input only ever arrives
/// from the handshake path, which this type exists to guard.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("handshake frame too short: {len} bytes, need at least 2")]
    HandshakeTooShort { len: usize },
    #[error("event frame too short: {len} bytes, need at least 4")]
    EventTooShort { len: usize },
    #[error("unknown event type id {type_id}")]
    UnknownEventType { type_id: u32 },
    #[error("event frame has wrong length: type {type_id} expects {expected} bytes, got {actual}")]
    WrongLength { type_id: u32, expected: usize, actual: usize },
}

/// One input event in the shape §4.5 of the core spec describes: a 4-byte
/// little-endian type id followed by big-endian fields and a big-endian
/// 64-bit microsecond timestamp relative to stream start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown { vk: u16, modifiers: u16, scancode: u16 },
    KeyUp { vk: u16, modifiers: u16, scancode: u16 },
    /// x/y already normalized to the 0..=65535 wire range.
    MouseAbsolute { x: u16, y: u16 },
    MouseRelative { dx: i16, dy: i16 },
    /// 1-based GFN button id (browser/OS 0/1/2 -> GFN 1/2/3).
    MouseButtonDown { button: u8 },
    MouseButtonUp { button: u8 },
    /// Quantized to units of ±120, sign already inverted per §4.5.
    MouseWheel { horizontal: i16, vertical: i16 },
}

impl InputEvent {
    pub fn type_id(self) -> u32 {
        match self {
            InputEvent::KeyDown { .. } => 3,
            InputEvent::KeyUp { .. } => 4,
            InputEvent::MouseAbsolute { .. } => 5,
            InputEvent::MouseRelative { .. } => 7,
            InputEvent::MouseButtonDown { .. } => 8,
            InputEvent::MouseButtonUp { .. } => 9,
            InputEvent::MouseWheel { .. } => 10,
        }
    }

    /// Total encoded size in bytes, including the 4-byte type prefix.
    pub fn frame_len(self) -> usize {
        match self {
            InputEvent::KeyDown { .. } | InputEvent::KeyUp { .. } => 18,
            InputEvent::MouseAbsolute { .. } => 26,
            InputEvent::MouseRelative { .. } => 22,
            InputEvent::MouseButtonDown { .. } | InputEvent::MouseButtonUp { .. } => 18,
            InputEvent::MouseWheel { .. } => 22,
        }
    }
}

/// Encode one event, relative to `stream_start`, as the fixed-size binary
/// frame in §4.5. `ts_us` must already be relative to stream start.
pub fn encode_event(event: InputEvent, ts_us: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(event.frame_len());
    out.extend_from_slice(&event.type_id().to_le_bytes());

    match event {
        InputEvent::KeyDown { vk, modifiers, scancode }
        | InputEvent::KeyUp { vk, modifiers, scancode } => {
            out.extend_from_slice(&vk.to_be_bytes());
            out.extend_from_slice(&modifiers.to_be_bytes());
            out.extend_from_slice(&scancode.to_be_bytes());
            out.extend_from_slice(&ts_us.to_be_bytes());
        }
        InputEvent::MouseAbsolute { x, y } => {
            out.extend_from_slice(&x.to_be_bytes());
            out.extend_from_slice(&y.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&0xFFFFu16.to_be_bytes());
            out.extend_from_slice(&0xFFFFu16.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&ts_us.to_be_bytes());
        }
        InputEvent::MouseRelative { dx, dy } => {
            out.extend_from_slice(&dx.to_be_bytes());
            out.extend_from_slice(&dy.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&ts_us.to_be_bytes());
        }
        InputEvent::MouseButtonDown { button } | InputEvent::MouseButtonUp { button } => {
            out.push(button);
            out.push(0);
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&ts_us.to_be_bytes());
        }
        InputEvent::MouseWheel { horizontal, vertical } => {
            out.extend_from_slice(&horizontal.to_be_bytes());
            out.extend_from_slice(&vertical.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&ts_us.to_be_bytes());
        }
    }

    debug_assert_eq!(out.len(), event.frame_len());
    debug_assert!(matches!(event.frame_len(), 18 | 22 | 26));
    out
}

/// Decode a frame previously produced by `encode_event`. Not needed on the
/// hot send path (the server is the only consumer of our input frames) but
/// kept public for round-trip testing of the wire layout.
pub fn decode_event(bytes: &[u8]) -> Result<(InputEvent, u64), FrameError> {
    if bytes.len() < 4 {
        return Err(FrameError::EventTooShort { len: bytes.len() });
    }
    let type_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let body = &bytes[4..];

    let expect = |expected: usize| -> Result<(), FrameError> {
        if body.len() != expected - 4 {
            Err(FrameError::WrongLength { type_id, expected, actual: bytes.len() })
        } else {
            Ok(())
        }
    };

    macro_rules! be_u16 { ($off:expr) => { u16::from_be_bytes([body[$off], body[$off + 1]]) } }
    macro_rules! be_i16 { ($off:expr) => { i16::from_be_bytes([body[$off], body[$off + 1]]) } }
    macro_rules! be_u64 { ($off:expr) => {
        u64::from_be_bytes(body[$off..$off + 8].try_into().unwrap())
    } }

    match type_id {
        3 | 4 => {
            expect(18)?;
            let vk = be_u16!(0);
            let modifiers = be_u16!(2);
            let scancode = be_u16!(4);
            let ts = be_u64!(6);
            let event = if type_id == 3 {
                InputEvent::KeyDown { vk, modifiers, scancode }
            } else {
                InputEvent::KeyUp { vk, modifiers, scancode }
            };
            Ok((event, ts))
        }
        5 => {
            expect(26)?;
            let x = be_u16!(0);
            let y = be_u16!(2);
            let ts = be_u64!(14);
            Ok((InputEvent::MouseAbsolute { x, y }, ts))
        }
        7 => {
            expect(22)?;
            let dx = be_i16!(0);
            let dy = be_i16!(2);
            let ts = be_u64!(10);
            Ok((InputEvent::MouseRelative { dx, dy }, ts))
        }
        8 | 9 => {
            expect(18)?;
            let button = body[0];
            let ts = be_u64!(6);
            let event = if type_id == 8 {
                InputEvent::MouseButtonDown { button }
            } else {
                InputEvent::MouseButtonUp { button }
            };
            Ok((event, ts))
        }
        10 => {
            expect(22)?;
            let horizontal = be_i16!(0);
            let vertical = be_i16!(2);
            let ts = be_u64!(10);
            Ok((InputEvent::MouseWheel { horizontal, vertical }, ts))
        }
        other => Err(FrameError::UnknownEventType { type_id: other }),
    }
}

/// The 10-byte protocol-v3 envelope prepended to every datagram once the
/// handshake-recorded protocol version is > 2: `[0x23][ts_us BE][0x22]`.
pub fn wrap_v3_envelope(frame: &[u8], ts_us: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + frame.len());
    out.push(0x23);
    out.extend_from_slice(&ts_us.to_be_bytes());
    out.push(0x22);
    out.extend_from_slice(frame);
    out
}

/// The server's first message on `input_channel_v1`, and our parse of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// The exact bytes received, needed to produce a byte-identical echo.
    raw: Vec<u8>,
    pub protocol_version: u16,
}

impl Handshake {
    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Whether outgoing datagrams must carry the protocol-v3 envelope.
    pub fn needs_v3_envelope(&self) -> bool {
        self.protocol_version > 2
    }
}

/// Parse the server's handshake bytes per §4.5: a little-endian 16-bit word,
/// either the new-format marker (526 / 0x020E) followed by a version word,
/// or (old format) the version itself.
pub fn decode_handshake(bytes: &[u8]) -> Result<Handshake, FrameError> {
    if bytes.len() < 2 {
        return Err(FrameError::HandshakeTooShort { len: bytes.len() });
    }
    let word = u16::from_le_bytes([bytes[0], bytes[1]]);
    const NEW_FORMAT_MARKER: u16 = 526; // 0x020E

    let protocol_version = if word == NEW_FORMAT_MARKER {
        if bytes.len() >= 4 {
            u16::from_le_bytes([bytes[2], bytes[3]])
        } else {
            0
        }
    } else {
        word
    };

    Ok(Handshake { raw: bytes.to_vec(), protocol_version })
}

/// Echo the handshake bytes back verbatim, per §4.5's handshake-echo rule.
pub fn encode_handshake_echo(handshake: &Handshake) -> Vec<u8> {
    handshake.raw.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_down_frame_is_18_bytes() {
        let frame = encode_event(InputEvent::KeyDown { vk: 0x57, modifiers: 1, scancode: 0x11 }, 42);
        assert_eq!(frame.len(), 18);
        assert_eq!(u32::from_le_bytes(frame[0..4].try_into().unwrap()), 3);
    }

    #[test]
    fn mouse_absolute_frame_is_26_bytes_with_range_constants() {
        let frame = encode_event(InputEvent::MouseAbsolute { x: 100, y: 200 }, 0);
        assert_eq!(frame.len(), 26);
        assert_eq!(u32::from_le_bytes(frame[0..4].try_into().unwrap()), 5);
        assert_eq!(u16::from_be_bytes([frame[10], frame[11]]), 0xFFFF);
        assert_eq!(u16::from_be_bytes([frame[12], frame[13]]), 0xFFFF);
    }

    #[test]
    fn mouse_relative_matches_scenario_3_worked_example() {
        // spec.md §8 scenario 3: dx=5, dy=-7 at stream_start + 1ms (1000us).
        let frame = encode_event(InputEvent::MouseRelative { dx: 5, dy: -7 }, 1000);
        let expected = [
            0x07, 0x00, 0x00, 0x00, 0x00, 0x05, 0xFF, 0xF9, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xE8,
        ];
        assert_eq!(frame, expected);
    }

    #[test]
    fn v3_envelope_matches_scenario_3_worked_example() {
        let envelope = wrap_v3_envelope(&[], 1000);
        let expected = [0x23, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xE8, 0x22];
        assert_eq!(envelope, expected);
    }

    #[test]
    fn button_frame_fields_land_at_expected_offsets() {
        let frame = encode_event(InputEvent::MouseButtonDown { button: 1 }, 7);
        assert_eq!(frame.len(), 18);
        assert_eq!(frame[4], 1); // button
        assert_eq!(frame[5], 0); // reserved
    }

    #[test]
    fn event_roundtrips_through_decode() {
        for (event, ts) in [
            (InputEvent::KeyDown { vk: 0x41, modifiers: 2, scancode: 0x1E }, 10u64),
            (InputEvent::KeyUp { vk: 0x41, modifiers: 0, scancode: 0x1E }, 20),
            (InputEvent::MouseAbsolute { x: 1000, y: 2000 }, 30),
            (InputEvent::MouseRelative { dx: -5, dy: 7 }, 40),
            (InputEvent::MouseButtonDown { button: 2 }, 50),
            (InputEvent::MouseButtonUp { button: 3 }, 60),
            (InputEvent::MouseWheel { horizontal: 0, vertical: -120 }, 70),
        ] {
            let frame = encode_event(event, ts);
            let (decoded, decoded_ts) = decode_event(&frame).unwrap();
            assert_eq!(decoded, event);
            assert_eq!(decoded_ts, ts);
        }
    }

    #[test]
    fn decode_event_rejects_unknown_type() {
        let bytes = [99u8, 0, 0, 0];
        assert_eq!(
            decode_event(&bytes),
            Err(FrameError::UnknownEventType { type_id: 99 })
        );
    }

    #[test]
    fn decode_event_rejects_truncated_frame() {
        let bytes = [3u8, 0, 0, 0, 1, 2];
        assert!(matches!(decode_event(&bytes), Err(FrameError::WrongLength { .. })));
    }

    #[test]
    fn handshake_new_format_scenario_3() {
        let bytes = [0x0E, 0x02, 0x03, 0x00];
        let handshake = decode_handshake(&bytes).unwrap();
        assert_eq!(handshake.protocol_version(), 3);
        assert!(handshake.needs_v3_envelope());
        assert_eq!(encode_handshake_echo(&handshake), bytes);
    }

    #[test]
    fn handshake_old_format_scenario_4() {
        let bytes = [0x02, 0x00];
        let handshake = decode_handshake(&bytes).unwrap();
        assert_eq!(handshake.protocol_version(), 2);
        assert!(!handshake.needs_v3_envelope());
        assert_eq!(encode_handshake_echo(&handshake), bytes);
    }

    #[test]
    fn handshake_echo_is_identity_for_any_observed_frame() {
        // §8: decoder(encoder(bytes)) = bytes for every observed server-handshake frame.
        for bytes in [vec![0x02, 0x00], vec![0x0E, 0x02, 0x03, 0x00], vec![0x0E, 0x02]] {
            let handshake = decode_handshake(&bytes).unwrap();
            assert_eq!(encode_handshake_echo(&handshake), bytes);
        }
    }

    #[test]
    fn handshake_rejects_empty_bytes() {
        assert!(matches!(
            decode_handshake(&[]),
            Err(FrameError::HandshakeTooShort { len: 0 })
        ));
    }
}
