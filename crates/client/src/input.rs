//! Capture-direction input pipeline (§4.5 supplement): the teacher's
//! `InputInjector` drives `uinput` on the host side (injection); this
//! polls the local OS pointer/keyboard and sends `gfn_protocol` wire
//! frames on `input_channel_v1` (capture). Same shape — typed event
//! boundary, pure coordinate/scroll helpers unit-tested in isolation, a
//! dedicated OS-interaction thread whose accumulator is drained under a
//! short-held mutex — opposite data direction.
//!
//! Global OS-level input capture has no counterpart in any pack example;
//! grounded on the `rdev` crate (cross-platform global keyboard/mouse
//! hook) — see DESIGN.md for the justification this addition requires.

use gfn_protocol::frame::{self, Handshake, InputEvent};
use rdev::{Button, EventType, Key};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::RTCDataChannel;

/// Rolling-average latency stats published to StatsSampler (§4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct InputLatency {
    pub ipc_ms: f64,
    pub send_ms: f64,
    pub total_ms: f64,
    pub events_per_second: f64,
}

struct RollingAverage {
    samples: [f64; 100],
    index: usize,
    filled: usize,
}

impl RollingAverage {
    fn new() -> Self {
        Self { samples: [0.0; 100], index: 0, filled: 0 }
    }

    fn push(&mut self, value: f64) -> f64 {
        self.samples[self.index] = value;
        self.index = (self.index + 1) % self.samples.len();
        self.filled = (self.filled + 1).min(self.samples.len());
        self.samples[..self.filled].iter().sum::<f64>() / self.filled as f64
    }
}

/// Mouse-delta accumulator touched by the OS-polling thread and drained by
/// the event loop. Held only long enough to read-and-zero two deltas (§5).
#[derive(Default)]
struct RelAccumulator {
    dx: f64,
    dy: f64,
}

pub(crate) struct ModifierState {
    shift: bool,
    ctrl: bool,
    alt: bool,
    meta: bool,
}

impl ModifierState {
    fn new() -> Self {
        Self { shift: false, ctrl: false, alt: false, meta: false }
    }

    /// Mask bit set only when held AND the key just pressed/released is not
    /// itself that modifier (prevents double-reporting on Shift's own
    /// key-down, per §4.5).
    fn mask_excluding(&self, key: Key) -> u16 {
        let mut mask = 0u16;
        if self.shift && !matches!(key, Key::ShiftLeft | Key::ShiftRight) {
            mask |= 1;
        }
        if self.ctrl && !matches!(key, Key::ControlLeft | Key::ControlRight) {
            mask |= 2;
        }
        if self.alt && !matches!(key, Key::Alt | Key::AltGr) {
            mask |= 4;
        }
        if self.meta && !matches!(key, Key::MetaLeft | Key::MetaRight) {
            mask |= 8;
        }
        mask
    }

    fn update(&mut self, key: Key, down: bool) {
        match key {
            Key::ShiftLeft | Key::ShiftRight => self.shift = down,
            Key::ControlLeft | Key::ControlRight => self.ctrl = down,
            Key::Alt | Key::AltGr => self.alt = down,
            Key::MetaLeft | Key::MetaRight => self.meta = down,
            _ => {}
        }
    }
}

/// Map a physical key identifier to its Windows VK code (§4.5). Only the
/// keys reachable from a standard US-layout keyboard are covered; anything
/// else reports `Unknown` to the caller via `vk_code_for`'s `Option`.
fn vk_code_for(key: Key) -> Option<u16> {
    use Key::*;
    Some(match key {
        Backspace => 0x08,
        Tab => 0x09,
        Return | KpReturn => 0x0D,
        ShiftLeft | ShiftRight => 0x10,
        ControlLeft | ControlRight => 0x11,
        Alt | AltGr => 0x12,
        Pause => 0x13,
        CapsLock => 0x14,
        Escape => 0x1B,
        Space => 0x20,
        PageUp => 0x21,
        PageDown => 0x22,
        End => 0x23,
        Home => 0x24,
        LeftArrow => 0x25,
        UpArrow => 0x26,
        RightArrow => 0x27,
        DownArrow => 0x28,
        PrintScreen => 0x2C,
        Insert => 0x2D,
        Delete => 0x2E,
        Num0 => 0x30,
        Num1 => 0x31,
        Num2 => 0x32,
        Num3 => 0x33,
        Num4 => 0x34,
        Num5 => 0x35,
        Num6 => 0x36,
        Num7 => 0x37,
        Num8 => 0x38,
        Num9 => 0x39,
        KeyA => 0x41,
        KeyB => 0x42,
        KeyC => 0x43,
        KeyD => 0x44,
        KeyE => 0x45,
        KeyF => 0x46,
        KeyG => 0x47,
        KeyH => 0x48,
        KeyI => 0x49,
        KeyJ => 0x4A,
        KeyK => 0x4B,
        KeyL => 0x4C,
        KeyM => 0x4D,
        KeyN => 0x4E,
        KeyO => 0x4F,
        KeyP => 0x50,
        KeyQ => 0x51,
        KeyR => 0x52,
        KeyS => 0x53,
        KeyT => 0x54,
        KeyU => 0x55,
        KeyV => 0x56,
        KeyW => 0x57,
        KeyX => 0x58,
        KeyY => 0x59,
        KeyZ => 0x5A,
        MetaLeft => 0x5B,
        MetaRight => 0x5C,
        Kp0 => 0x60,
        Kp1 => 0x61,
        Kp2 => 0x62,
        Kp3 => 0x63,
        Kp4 => 0x64,
        Kp5 => 0x65,
        Kp6 => 0x66,
        Kp7 => 0x67,
        Kp8 => 0x68,
        Kp9 => 0x69,
        KpMultiply => 0x6A,
        KpPlus => 0x6B,
        KpMinus => 0x6D,
        KpDelete => 0x6E,
        KpDivide => 0x6F,
        F1 => 0x70,
        F2 => 0x71,
        F3 => 0x72,
        F4 => 0x73,
        F5 => 0x74,
        F6 => 0x75,
        F7 => 0x76,
        F8 => 0x77,
        F9 => 0x78,
        F10 => 0x79,
        F11 => 0x7A,
        F12 => 0x7B,
        NumLock => 0x90,
        ScrollLock => 0x91,
        SemiColon => 0xBA,
        Equal => 0xBB,
        Comma => 0xBC,
        Minus => 0xBD,
        Dot => 0xBE,
        Slash => 0xBF,
        BackQuote => 0xC0,
        LeftBracket => 0xDB,
        BackSlash => 0xDC,
        RightBracket => 0xDD,
        Quote => 0xDE,
        IntlBackslash => 0xE2,
        Unknown(_) | Function => return None,
    })
}

/// Map a physical key identifier to its PS/2 Set 1 hardware scancode (§4.5's
/// `scancode` field is a distinct physical-key value, not an alias of `vk`).
/// Keys with an extended (two-byte, `0xE0`-prefixed) Set 1 code are folded
/// into a u16 as `0xE0__` to keep the single-field wire layout; the server
/// side (outside this crate) is expected to mask it back apart if it cares.
fn scancode_for(key: Key) -> Option<u16> {
    use Key::*;
    Some(match key {
        Escape => 0x01,
        Num1 => 0x02,
        Num2 => 0x03,
        Num3 => 0x04,
        Num4 => 0x05,
        Num5 => 0x06,
        Num6 => 0x07,
        Num7 => 0x08,
        Num8 => 0x09,
        Num9 => 0x0A,
        Num0 => 0x0B,
        Minus => 0x0C,
        Equal => 0x0D,
        Backspace => 0x0E,
        Tab => 0x0F,
        KeyQ => 0x10,
        KeyW => 0x11,
        KeyE => 0x12,
        KeyR => 0x13,
        KeyT => 0x14,
        KeyY => 0x15,
        KeyU => 0x16,
        KeyI => 0x17,
        KeyO => 0x18,
        KeyP => 0x19,
        LeftBracket => 0x1A,
        RightBracket => 0x1B,
        Return => 0x1C,
        ControlLeft => 0x1D,
        ControlRight => 0xE01D,
        KeyA => 0x1E,
        KeyS => 0x1F,
        KeyD => 0x20,
        KeyF => 0x21,
        KeyG => 0x22,
        KeyH => 0x23,
        KeyJ => 0x24,
        KeyK => 0x25,
        KeyL => 0x26,
        SemiColon => 0x27,
        Quote => 0x28,
        BackQuote => 0x29,
        ShiftLeft => 0x2A,
        BackSlash => 0x2B,
        KeyZ => 0x2C,
        KeyX => 0x2D,
        KeyC => 0x2E,
        KeyV => 0x2F,
        KeyB => 0x30,
        KeyN => 0x31,
        KeyM => 0x32,
        Comma => 0x33,
        Dot => 0x34,
        Slash => 0x35,
        ShiftRight => 0x36,
        KpMultiply => 0x37,
        Alt => 0x38,
        AltGr => 0xE038,
        Space => 0x39,
        CapsLock => 0x3A,
        F1 => 0x3B,
        F2 => 0x3C,
        F3 => 0x3D,
        F4 => 0x3E,
        F5 => 0x3F,
        F6 => 0x40,
        F7 => 0x41,
        F8 => 0x42,
        F9 => 0x43,
        F10 => 0x44,
        NumLock => 0x45,
        ScrollLock => 0x46,
        Kp7 => 0x47,
        Kp8 => 0x48,
        Kp9 => 0x49,
        KpMinus => 0x4A,
        Kp4 => 0x4B,
        Kp5 => 0x4C,
        Kp6 => 0x4D,
        KpPlus => 0x4E,
        Kp1 => 0x4F,
        Kp2 => 0x50,
        Kp3 => 0x51,
        Kp0 => 0x52,
        KpDelete => 0x53,
        IntlBackslash => 0x56,
        F11 => 0x57,
        F12 => 0x58,
        KpReturn => 0xE01C,
        KpDivide => 0xE035,
        PrintScreen => 0xE037,
        Home => 0xE047,
        UpArrow => 0xE048,
        PageUp => 0xE049,
        LeftArrow => 0xE04B,
        RightArrow => 0xE04D,
        End => 0xE04F,
        DownArrow => 0xE050,
        PageDown => 0xE051,
        Insert => 0xE052,
        Delete => 0xE053,
        MetaLeft => 0xE05B,
        MetaRight => 0xE05C,
        Pause => 0xE11D,
        Unknown(_) | Function => return None,
    })
}

/// GFN button id (1-based) from a browser/OS mouse button (§4.5: 0/1/2 -> 1/2/3).
fn gfn_button_id(button: Button) -> u8 {
    match button {
        Button::Left => 1,
        Button::Middle => 2,
        Button::Right => 3,
        Button::Unknown(n) => n.saturating_add(1),
    }
}

/// Normalize absolute pixel coordinates to the wire's 0..=65535 range,
/// clamped to the viewport (§4.5).
pub fn clamp_to_u16_viewport(x: f64, y: f64, viewport_w: u32, viewport_h: u32) -> (u16, u16) {
    let nx = if viewport_w == 0 { 0.0 } else { (x / viewport_w as f64).clamp(0.0, 1.0) };
    let ny = if viewport_h == 0 { 0.0 } else { (y / viewport_h as f64).clamp(0.0, 1.0) };
    ((nx * 65535.0).round() as u16, (ny * 65535.0).round() as u16)
}

/// Accumulate a raw OS wheel delta into quantized ±120 units with the sign
/// inverted (§4.5). Returns 0 while the accumulator hasn't crossed a
/// full notch.
pub fn accumulate_scroll_units(accum: &mut i64, raw_delta: i64) -> i16 {
    *accum += raw_delta;
    if *accum == 0 {
        return 0;
    }
    let notches = accum.signum();
    *accum -= notches;
    (-notches * 120) as i16
}

/// Translates OS input events into `InputEvent`s, encodes them with
/// `gfn_protocol::frame`, and writes them to `input_channel_v1` once the
/// server handshake has completed. Owns no peer-connection reference beyond
/// the data channel handle it is given.
pub struct InputPipeline {
    channel: Arc<RTCDataChannel>,
    stream_start: Mutex<Option<Instant>>,
    ready: AtomicBool,
    needs_v3_envelope: AtomicBool,
    accumulator: Arc<Mutex<RelAccumulator>>,
    event_count: AtomicU64,
    latency: Arc<tokio::sync::Mutex<InputLatency>>,
    send_avg: Mutex<RollingAverage>,
    rate_window: Mutex<(Instant, u64)>,
}

impl InputPipeline {
    pub fn new(channel: Arc<RTCDataChannel>, latency: Arc<tokio::sync::Mutex<InputLatency>>) -> Arc<Self> {
        Arc::new(Self {
            channel,
            stream_start: Mutex::new(None),
            ready: AtomicBool::new(false),
            needs_v3_envelope: AtomicBool::new(false),
            accumulator: Arc::new(Mutex::new(RelAccumulator::default())),
            event_count: AtomicU64::new(0),
            latency,
            send_avg: Mutex::new(RollingAverage::new()),
            rate_window: Mutex::new((Instant::now(), 0)),
        })
    }

    /// Wires the handshake reply and arms the pipeline (§4.5). Events
    /// produced before the handshake completes are dropped.
    pub fn install_handshake_handler(self: &Arc<Self>) {
        let pipeline = Arc::clone(self);
        let channel = Arc::clone(&self.channel);
        self.channel.on_message(Box::new(move |msg| {
            let pipeline = Arc::clone(&pipeline);
            let channel = Arc::clone(&channel);
            Box::pin(async move {
                if pipeline.ready.load(Ordering::Acquire) {
                    return;
                }
                match frame::decode_handshake(&msg.data) {
                    Ok(handshake) => pipeline.complete_handshake(handshake, &channel).await,
                    Err(e) => warn!("malformed input handshake: {e}"),
                }
            })
        }));
    }

    async fn complete_handshake(&self, handshake: Handshake, channel: &Arc<RTCDataChannel>) {
        let echo = frame::encode_handshake_echo(&handshake);
        if let Err(e) = channel.send(&bytes::Bytes::from(echo)).await {
            warn!("failed to echo input handshake: {e}");
            return;
        }
        *self.stream_start.lock().unwrap() = Some(Instant::now());
        self.needs_v3_envelope.store(handshake.needs_v3_envelope(), Ordering::Release);
        self.ready.store(true, Ordering::Release);
        info!(version = handshake.protocol_version(), "input handshake complete, pipeline armed");
    }

    fn elapsed_us(&self) -> Option<u64> {
        let start = self.stream_start.lock().unwrap();
        start.map(|s| s.elapsed().as_micros() as u64)
    }

    /// Encode and send one event; drops relative deltas on back-pressure and
    /// retries button edges once before dropping with a warning (§4.5).
    async fn dispatch(&self, event: InputEvent) {
        if !self.ready.load(Ordering::Acquire) {
            return;
        }
        let Some(ts_us) = self.elapsed_us() else { return };

        let mut frame_bytes = frame::encode_event(event, ts_us);
        if self.needs_v3_envelope.load(Ordering::Acquire) {
            frame_bytes = frame::wrap_v3_envelope(&frame_bytes, ts_us);
        }
        let payload = bytes::Bytes::from(frame_bytes);

        let is_button_edge = matches!(event, InputEvent::MouseButtonDown { .. } | InputEvent::MouseButtonUp { .. });

        if self.channel.buffered_amount().await > BUFFER_HIGH_WATER_MARK {
            if is_button_edge {
                // Retry once after yielding, then drop with a warning.
                tokio::task::yield_now().await;
                if self.channel.buffered_amount().await > BUFFER_HIGH_WATER_MARK {
                    warn!(?event, "dropping button edge after retry: channel buffer full");
                    return;
                }
            } else {
                return;
            }
        }

        let send_started = Instant::now();
        if let Err(e) = self.channel.send(&payload).await {
            warn!("failed to send input frame: {e}");
            return;
        }
        let send_ms = send_started.elapsed().as_secs_f64() * 1000.0;
        self.event_count.fetch_add(1, Ordering::Relaxed);
        self.record_latency(send_ms).await;
    }

    /// Rolls the measured send latency into the published `InputLatency` and
    /// refreshes the events/sec counter every full second (§4.6's stats
    /// feed). IPC latency isn't measurable here: `rdev`'s callback gives no
    /// OS-side timestamp to diff against, so it's reported as 0.
    async fn record_latency(&self, send_ms: f64) {
        let avg_send_ms = self.send_avg.lock().unwrap().push(send_ms);
        let events_per_second = {
            let mut window = self.rate_window.lock().unwrap();
            window.1 += 1;
            let elapsed = window.0.elapsed().as_secs_f64();
            if elapsed >= 1.0 {
                let rate = window.1 as f64 / elapsed;
                *window = (Instant::now(), 0);
                Some(rate)
            } else {
                None
            }
        };

        let mut latency = self.latency.lock().await;
        latency.send_ms = avg_send_ms;
        latency.total_ms = latency.ipc_ms + avg_send_ms;
        if let Some(rate) = events_per_second {
            latency.events_per_second = rate;
        }
    }

    /// Fold a raw pointer delta into the mutex-protected accumulator.
    /// Called from the OS-polling thread; holds the lock only long enough
    /// to add two floats (§5).
    fn accumulate_relative(&self, dx: f64, dy: f64) {
        let mut acc = self.accumulator.lock().unwrap();
        acc.dx += dx;
        acc.dy += dy;
    }

    /// Drain the relative-mouse accumulator and send one `MouseRelative`
    /// frame if non-zero. Called on a minimal scheduler tick by the event
    /// loop (§4.5).
    pub async fn drain_relative_motion(&self) {
        let (dx, dy) = {
            let mut accum = self.accumulator.lock().unwrap();
            let d = (accum.dx, accum.dy);
            accum.dx = 0.0;
            accum.dy = 0.0;
            d
        };
        let dx_i = dx.round() as i32;
        let dy_i = dy.round() as i32;
        if dx_i == 0 && dy_i == 0 {
            return;
        }
        self.dispatch(InputEvent::MouseRelative {
            dx: dx_i.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            dy: dy_i.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        })
        .await;
    }

    pub(crate) async fn key_event(&self, key: Key, pressed: bool, modifiers: &ModifierState) {
        let Some(vk) = vk_code_for(key) else { return };
        let scancode = scancode_for(key).unwrap_or(0);
        let event = if pressed {
            InputEvent::KeyDown { vk, modifiers: modifiers.mask_excluding(key), scancode }
        } else {
            InputEvent::KeyUp { vk, modifiers: modifiers.mask_excluding(key), scancode }
        };
        self.dispatch(event).await;
    }

    pub async fn button_event(&self, button: Button, pressed: bool) {
        let id = gfn_button_id(button);
        let event = if pressed {
            InputEvent::MouseButtonDown { button: id }
        } else {
            InputEvent::MouseButtonUp { button: id }
        };
        self.dispatch(event).await;
    }

    /// Used when the session starts in absolute-cursor mode (pointer lock
    /// not yet acquired); subsequent movement switches to relative deltas.
    pub async fn absolute_move(&self, x: f64, y: f64, viewport_w: u32, viewport_h: u32) {
        let (wx, wy) = clamp_to_u16_viewport(x, y, viewport_w, viewport_h);
        self.dispatch(InputEvent::MouseAbsolute { x: wx, y: wy }).await;
    }

    pub async fn wheel_event(&self, delta_x: i64, delta_y: i64, accum_x: &mut i64, accum_y: &mut i64) {
        let horizontal = accumulate_scroll_units(accum_x, delta_x);
        let vertical = accumulate_scroll_units(accum_y, delta_y);
        if horizontal == 0 && vertical == 0 {
            return;
        }
        self.dispatch(InputEvent::MouseWheel { horizontal, vertical }).await;
    }
}

const BUFFER_HIGH_WATER_MARK: usize = 64 * 1024;

/// Events the OS-polling thread emits for the async event loop to drain
/// (button edges, key edges, and wheel notches flow through this channel;
/// relative deltas bypass it via the mutex-protected accumulator per §5).
#[derive(Debug, Clone)]
pub enum CapturedInput {
    Key { key: Key, pressed: bool },
    Button { button: Button, pressed: bool },
    Wheel { delta_x: i64, delta_y: i64 },
}

/// Spawn the dedicated OS-interaction thread (§5: "one parallel OS thread").
/// Relative deltas are folded directly into the pipeline's accumulator;
/// everything else is forwarded on `tx` for the event loop to encode.
pub fn spawn_capture_thread(
    pipeline: Arc<InputPipeline>,
    tx: mpsc::UnboundedSender<CapturedInput>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut last_pos: Option<(f64, f64)> = None;
        let result = rdev::listen(move |event| {
            match event.event_type {
                EventType::MouseMove { x, y } => {
                    if let Some((lx, ly)) = last_pos {
                        pipeline.accumulate_relative(x - lx, y - ly);
                    }
                    last_pos = Some((x, y));
                }
                EventType::KeyPress(key) => {
                    let _ = tx.send(CapturedInput::Key { key, pressed: true });
                }
                EventType::KeyRelease(key) => {
                    let _ = tx.send(CapturedInput::Key { key, pressed: false });
                }
                EventType::ButtonPress(button) => {
                    let _ = tx.send(CapturedInput::Button { button, pressed: true });
                }
                EventType::ButtonRelease(button) => {
                    let _ = tx.send(CapturedInput::Button { button, pressed: false });
                }
                EventType::Wheel { delta_x, delta_y } => {
                    let _ = tx.send(CapturedInput::Wheel { delta_x, delta_y });
                }
            }
        });
        if let Err(e) = result {
            warn!("global input capture stopped: {e:?}");
        }
    })
}

/// Runs the event-loop side of input: forwards captured key/button/wheel
/// events to the pipeline, tracking modifier state and distinct held keys
/// so repeated key-down autorepeat doesn't re-trigger modifier bookkeeping.
pub async fn run_capture_loop(pipeline: Arc<InputPipeline>, mut rx: mpsc::UnboundedReceiver<CapturedInput>) {
    let mut modifiers = ModifierState::new();
    let mut held_keys: HashSet<Key> = HashSet::new();
    let mut scroll_accum_x = 0i64;
    let mut scroll_accum_y = 0i64;
    // 125Hz: drains the mouse-delta accumulator independently of the edge
    // events flowing through `rx` (§5's "one parallel OS thread" design).
    let mut motion_tick = tokio::time::interval(std::time::Duration::from_millis(8));

    loop {
        tokio::select! {
            captured = rx.recv() => {
                let Some(captured) = captured else { break };
                match captured {
                    CapturedInput::Key { key, pressed } => {
                        if pressed && !held_keys.insert(key) {
                            continue; // autorepeat, not a fresh edge
                        }
                        if !pressed {
                            held_keys.remove(&key);
                        }
                        modifiers.update(key, pressed);
                        pipeline.key_event(key, pressed, &modifiers).await;
                    }
                    CapturedInput::Button { button, pressed } => {
                        pipeline.button_event(button, pressed).await;
                    }
                    CapturedInput::Wheel { delta_x, delta_y } => {
                        pipeline.wheel_event(delta_x, delta_y, &mut scroll_accum_x, &mut scroll_accum_y).await;
                    }
                }
            }
            _ = motion_tick.tick() => {
                pipeline.drain_relative_motion().await;
            }
        }
    }
    debug!("input capture loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_to_u16_viewport_origin() {
        assert_eq!(clamp_to_u16_viewport(0.0, 0.0, 1920, 1080), (0, 0));
    }

    #[test]
    fn clamp_to_u16_viewport_bottom_right() {
        assert_eq!(clamp_to_u16_viewport(1920.0, 1080.0, 1920, 1080), (65535, 65535));
    }

    #[test]
    fn clamp_to_u16_viewport_center() {
        let (x, y) = clamp_to_u16_viewport(960.0, 540.0, 1920, 1080);
        assert!((x as i32 - 32767).abs() <= 1);
        assert!((y as i32 - 32767).abs() <= 1);
    }

    #[test]
    fn clamp_to_u16_viewport_clamps_out_of_bounds() {
        assert_eq!(clamp_to_u16_viewport(-100.0, -100.0, 1920, 1080), (0, 0));
        assert_eq!(clamp_to_u16_viewport(5000.0, 5000.0, 1920, 1080), (65535, 65535));
    }

    #[test]
    fn clamp_to_u16_viewport_zero_viewport_is_zero() {
        assert_eq!(clamp_to_u16_viewport(100.0, 100.0, 0, 0), (0, 0));
    }

    #[test]
    fn accumulate_scroll_units_single_notch_inverts_sign() {
        let mut accum = 0i64;
        assert_eq!(accumulate_scroll_units(&mut accum, 1), -120);
    }

    #[test]
    fn accumulate_scroll_units_negative_notch_inverts_sign() {
        let mut accum = 0i64;
        assert_eq!(accumulate_scroll_units(&mut accum, -1), 120);
    }

    #[test]
    fn accumulate_scroll_units_zero_delta_emits_nothing() {
        let mut accum = 0i64;
        assert_eq!(accumulate_scroll_units(&mut accum, 0), 0);
    }

    #[test]
    fn accumulate_scroll_units_multi_notch_drains_one_at_a_time() {
        let mut accum = 3i64;
        assert_eq!(accumulate_scroll_units(&mut accum, 0), -120);
        assert_eq!(accum, 2);
    }

    #[test]
    fn vk_code_for_known_keys() {
        assert_eq!(vk_code_for(Key::KeyW), Some(0x57));
        assert_eq!(vk_code_for(Key::UpArrow), Some(0x26));
        assert_eq!(vk_code_for(Key::F1), Some(0x70));
        assert_eq!(vk_code_for(Key::ShiftLeft), Some(0x10));
        assert_eq!(vk_code_for(Key::Kp0), Some(0x60));
        assert_eq!(vk_code_for(Key::IntlBackslash), Some(0xE2));
    }

    #[test]
    fn vk_code_for_unknown_key_is_none() {
        assert_eq!(vk_code_for(Key::Unknown(999)), None);
    }

    #[test]
    fn scancode_for_known_keys_differs_from_vk() {
        // Real PS/2 Set 1 scancodes, distinct from the Windows VK codes above.
        assert_eq!(scancode_for(Key::KeyW), Some(0x11));
        assert_eq!(scancode_for(Key::KeyA), Some(0x1E));
        assert_eq!(scancode_for(Key::F1), Some(0x3B));
        assert_eq!(scancode_for(Key::ShiftLeft), Some(0x2A));
        assert_eq!(scancode_for(Key::Kp0), Some(0x52));
    }

    #[test]
    fn scancode_for_extended_keys_uses_e0_prefix() {
        assert_eq!(scancode_for(Key::UpArrow), Some(0xE048));
        assert_eq!(scancode_for(Key::ControlRight), Some(0xE01D));
    }

    #[test]
    fn scancode_for_unknown_key_is_none() {
        assert_eq!(scancode_for(Key::Unknown(999)), None);
    }

    #[test]
    fn gfn_button_id_maps_left_middle_right() {
        assert_eq!(gfn_button_id(Button::Left), 1);
        assert_eq!(gfn_button_id(Button::Middle), 2);
        assert_eq!(gfn_button_id(Button::Right), 3);
    }

    #[test]
    fn modifier_mask_excludes_self_on_shift_keydown() {
        let mut modifiers = ModifierState::new();
        modifiers.update(Key::ShiftLeft, true);
        // Shift itself held down: its own edge must not set bit 1.
        assert_eq!(modifiers.mask_excluding(Key::ShiftLeft), 0);
    }

    #[test]
    fn modifier_mask_set_for_other_keys_while_shift_held() {
        let mut modifiers = ModifierState::new();
        modifiers.update(Key::ShiftLeft, true);
        assert_eq!(modifiers.mask_excluding(Key::KeyA), 1);
    }

    #[test]
    fn modifier_mask_combines_bits() {
        let mut modifiers = ModifierState::new();
        modifiers.update(Key::ShiftLeft, true);
        modifiers.update(Key::ControlLeft, true);
        assert_eq!(modifiers.mask_excluding(Key::KeyA), 0b11);
    }
}
