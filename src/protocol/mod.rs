use tracing::debug;

pub mod wire;

pub use wire::{decode_frame, encode_frame, read_frame, TransportError, MAX_PAYLOAD};

/// Advertised protocol version, major in the high byte.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Capabilities the server offers in its HELLO.
pub const SERVER_CAPS: [Capability; 3] = [
    Capability::TextOutput,
    Capability::KeyboardInput,
    Capability::MouseInput,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Control = 0x00,
    TextOut = 0x01,
    KeyboardIn = 0x02,
    MouseIn = 0x03,
    GfxRaw = 0x40,
    GfxPng = 0x41,
    GfxJpeg = 0x42,
    GfxH264 = 0x43,
    AudioPcm = 0x50,
    AudioOpus = 0x51,
}

impl Channel {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Control),
            0x01 => Some(Self::TextOut),
            0x02 => Some(Self::KeyboardIn),
            0x03 => Some(Self::MouseIn),
            0x40 => Some(Self::GfxRaw),
            0x41 => Some(Self::GfxPng),
            0x42 => Some(Self::GfxJpeg),
            0x43 => Some(Self::GfxH264),
            0x50 => Some(Self::AudioPcm),
            0x51 => Some(Self::AudioOpus),
            _ => None,
        }
    }
}

/// First payload byte on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMsg {
    Hello = 0x01,
    Goodbye = 0x02,
    ModeText = 0x10,
    ModeGraphics = 0x11,
    ModeUnsupported = 0x12,
    Refresh = 0x20,
    Resize = 0x21,
    CapsQuery = 0x30,
    CapsReply = 0x31,
}

impl ControlMsg {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Goodbye),
            0x10 => Some(Self::ModeText),
            0x11 => Some(Self::ModeGraphics),
            0x12 => Some(Self::ModeUnsupported),
            0x20 => Some(Self::Refresh),
            0x21 => Some(Self::Resize),
            0x30 => Some(Self::CapsQuery),
            0x31 => Some(Self::CapsReply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Capability {
    TextOutput = 0x01,
    KeyboardInput = 0x02,
    MouseInput = 0x03,
    GraphicsPng = 0x10,
    GraphicsJpeg = 0x11,
    GraphicsH264 = 0x12,
    AudioPcm = 0x20,
    AudioOpus = 0x21,
}

impl Capability {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::TextOutput),
            0x02 => Some(Self::KeyboardInput),
            0x03 => Some(Self::MouseInput),
            0x10 => Some(Self::GraphicsPng),
            0x11 => Some(Self::GraphicsJpeg),
            0x12 => Some(Self::GraphicsH264),
            0x20 => Some(Self::AudioPcm),
            0x21 => Some(Self::AudioOpus),
            _ => None,
        }
    }
}

/// What the client asked for in its HELLO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCaps {
    pub text: bool,
    pub graphics: bool,
    pub audio: bool,
}

/// Builds a HELLO control payload: version, capability count, capability ids.
pub fn encode_hello(caps: &[Capability]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + caps.len());
    payload.push(ControlMsg::Hello.as_u8());
    payload.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    payload.push(caps.len() as u8);
    for cap in caps {
        payload.push(cap.as_u8());
    }
    payload
}

/// Parses the body of a HELLO (everything after the control byte). Returns the
/// peer version and its capability flags, or `None` when the body is too short
/// to carry them. The capability list is read up to the declared count or the
/// payload end, whichever comes first; unknown ids are skipped.
pub fn parse_hello(body: &[u8]) -> Option<(u16, ClientCaps)> {
    if body.len() < 3 {
        return None;
    }
    let version = u16::from_be_bytes([body[0], body[1]]);
    let count = body[2] as usize;
    let mut caps = ClientCaps::default();
    for &id in body.iter().skip(3).take(count) {
        match Capability::from_u8(id) {
            Some(Capability::TextOutput) => caps.text = true,
            Some(
                Capability::GraphicsPng | Capability::GraphicsJpeg | Capability::GraphicsH264,
            ) => caps.graphics = true,
            Some(Capability::AudioPcm | Capability::AudioOpus) => caps.audio = true,
            Some(Capability::KeyboardInput | Capability::MouseInput) => {}
            None => debug!(cap = id, "skipping unknown capability id"),
        }
    }
    Some((version, caps))
}

pub fn encode_mode_text(cols: u16, rows: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(ControlMsg::ModeText.as_u8());
    payload.extend_from_slice(&cols.to_be_bytes());
    payload.extend_from_slice(&rows.to_be_bytes());
    payload
}

pub fn encode_mode_unsupported() -> Vec<u8> {
    vec![ControlMsg::ModeUnsupported.as_u8()]
}
