use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::capture::ModeClass;
use crate::protocol::{self, Channel, ClientCaps, ControlMsg, MAX_PAYLOAD};

const MODE_CLASS_TEXT: u8 = 0;
const MODE_CLASS_GRAPHICS: u8 = 1;
const MODE_CLASS_OTHER: u8 = 2;

pub(crate) struct OutboundFrame {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

/// State shared between the vsync context and the reader worker. Everything
/// here is either atomic or behind a short-lived lock; the cell grids stay
/// with the vsync side and never appear here.
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pub shutdown: Notify,
    connected: AtomicBool,
    handshake_done: AtomicBool,
    wants_text: AtomicBool,
    wants_graphics: AtomicBool,
    wants_audio: AtomicBool,
    force_redraw: AtomicBool,
    mode_notified: AtomicBool,
    // Last classification and geometry the vsync side observed, so the
    // HELLO-triggered notification has something accurate to report.
    mode_class: AtomicU8,
    cols: AtomicU16,
    rows: AtomicU16,
    outbound: Mutex<Option<UnboundedSender<OutboundFrame>>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            connected: AtomicBool::new(false),
            handshake_done: AtomicBool::new(false),
            wants_text: AtomicBool::new(true),
            wants_graphics: AtomicBool::new(false),
            wants_audio: AtomicBool::new(false),
            force_redraw: AtomicBool::new(true),
            mode_notified: AtomicBool::new(false),
            mode_class: AtomicU8::new(MODE_CLASS_TEXT),
            cols: AtomicU16::new(80),
            rows: AtomicU16::new(25),
            outbound: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_done.load(Ordering::Acquire)
    }

    pub fn wants_text(&self) -> bool {
        self.wants_text.load(Ordering::Relaxed)
    }

    pub fn wants_graphics(&self) -> bool {
        self.wants_graphics.load(Ordering::Relaxed)
    }

    pub fn wants_audio(&self) -> bool {
        self.wants_audio.load(Ordering::Relaxed)
    }

    pub fn set_force_redraw(&self) {
        self.force_redraw.store(true, Ordering::Relaxed);
    }

    pub fn take_force_redraw(&self) -> bool {
        self.force_redraw.swap(false, Ordering::Relaxed)
    }

    pub fn mode_notified(&self) -> bool {
        self.mode_notified.load(Ordering::Relaxed)
    }

    pub fn clear_mode_notified(&self) {
        self.mode_notified.store(false, Ordering::Relaxed);
    }

    pub fn set_mode_class(&self, class: ModeClass) {
        let value = match class {
            ModeClass::Text => MODE_CLASS_TEXT,
            ModeClass::Graphics => MODE_CLASS_GRAPHICS,
            ModeClass::Other => MODE_CLASS_OTHER,
        };
        self.mode_class.store(value, Ordering::Relaxed);
    }

    pub fn mode_class(&self) -> ModeClass {
        match self.mode_class.load(Ordering::Relaxed) {
            MODE_CLASS_TEXT => ModeClass::Text,
            MODE_CLASS_GRAPHICS => ModeClass::Graphics,
            _ => ModeClass::Other,
        }
    }

    pub fn set_dimensions(&self, cols: u16, rows: u16) {
        self.cols.store(cols, Ordering::Relaxed);
        self.rows.store(rows, Ordering::Relaxed);
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (
            self.cols.load(Ordering::Relaxed),
            self.rows.load(Ordering::Relaxed),
        )
    }

    /// Resets per-client negotiation state when a connection is accepted.
    pub fn begin_client(&self) {
        self.handshake_done.store(false, Ordering::Release);
        self.mode_notified.store(false, Ordering::Relaxed);
        self.wants_text.store(true, Ordering::Relaxed);
        self.wants_graphics.store(false, Ordering::Relaxed);
        self.wants_audio.store(false, Ordering::Relaxed);
        self.force_redraw.store(true, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    /// Tears the client down; dropping the sender lets the writer drain out.
    pub fn end_client(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.handshake_done.store(false, Ordering::Release);
        self.outbound.lock().unwrap().take();
    }

    pub fn attach_writer(&self, sender: UnboundedSender<OutboundFrame>) {
        *self.outbound.lock().unwrap() = Some(sender);
    }

    /// Queues one frame for the writer task. A missing client or an oversized
    /// payload drops the frame, never the session.
    pub fn send(&self, channel: Channel, payload: Vec<u8>) {
        if payload.len() > MAX_PAYLOAD {
            warn!(
                channel = channel.as_u8(),
                len = payload.len(),
                "dropping oversized frame"
            );
            return;
        }
        let guard = self.outbound.lock().unwrap();
        if let Some(sender) = guard.as_ref() {
            if sender.send(OutboundFrame { channel, payload }).is_err() {
                debug!("writer gone; dropping frame");
            }
        }
    }

    pub fn send_control(&self, payload: Vec<u8>) {
        self.send(Channel::Control, payload);
    }

    fn set_client_caps(&self, caps: ClientCaps) {
        self.wants_text.store(caps.text, Ordering::Relaxed);
        self.wants_graphics.store(caps.graphics, Ordering::Relaxed);
        self.wants_audio.store(caps.audio, Ordering::Relaxed);
    }

    fn finish_handshake(&self) {
        self.handshake_done.store(true, Ordering::Release);
    }
}

/// Whether the reader worker should keep servicing the current client.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    Continue,
    Disconnect,
}

pub(crate) fn send_hello(state: &SessionState) {
    state.send_control(protocol::encode_hello(&protocol::SERVER_CAPS));
}

/// Reports the current mode to a handshaken client: MODE_TEXT with the latest
/// geometry, MODE_UNSUPPORTED for graphics modes, nothing for anything else.
pub(crate) fn send_mode_notification(state: &SessionState) {
    if !state.handshake_complete() {
        return;
    }
    match state.mode_class() {
        ModeClass::Text => {
            let (cols, rows) = state.dimensions();
            state.send_control(protocol::encode_mode_text(cols, rows));
            state.mode_notified.store(true, Ordering::Relaxed);
        }
        ModeClass::Graphics => {
            state.send_control(protocol::encode_mode_unsupported());
            state.mode_notified.store(true, Ordering::Relaxed);
        }
        ModeClass::Other => {}
    }
}

pub(crate) fn handle_control(state: &SessionState, payload: &[u8]) -> Disposition {
    let Some((&msg_byte, body)) = payload.split_first() else {
        warn!("empty control payload");
        return Disposition::Continue;
    };
    match ControlMsg::from_u8(msg_byte) {
        Some(ControlMsg::Hello) => {
            handle_hello(state, body);
            Disposition::Continue
        }
        Some(ControlMsg::Goodbye) => {
            info!("client sent goodbye");
            Disposition::Disconnect
        }
        Some(ControlMsg::Refresh) => {
            debug!("client requested a full refresh");
            state.set_force_redraw();
            Disposition::Continue
        }
        Some(ControlMsg::Resize) => {
            if body.len() >= 4 {
                let cols = u16::from_be_bytes([body[0], body[1]]);
                let rows = u16::from_be_bytes([body[2], body[3]]);
                info!(cols, rows, "client terminal resized");
            } else {
                warn!(len = body.len(), "short resize payload");
            }
            Disposition::Continue
        }
        Some(other) => {
            debug!(msg = other.as_u8(), "ignoring server-to-client control message");
            Disposition::Continue
        }
        None => {
            warn!(msg = msg_byte, "unknown control message");
            Disposition::Continue
        }
    }
}

fn handle_hello(state: &SessionState, body: &[u8]) {
    let Some((version, caps)) = protocol::parse_hello(body) else {
        warn!(len = body.len(), "short hello payload");
        return;
    };
    info!(
        version_major = version >> 8,
        version_minor = version & 0xFF,
        text = caps.text,
        graphics = caps.graphics,
        audio = caps.audio,
        "client hello"
    );
    state.set_client_caps(caps);
    state.finish_handshake();
    send_mode_notification(state);
}
