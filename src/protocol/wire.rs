use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::Channel;

/// Largest payload expressible in the 24-bit length field.
pub const MAX_PAYLOAD: usize = 0xFF_FFFF;

pub const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(#[source] io::Error),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("connection closed mid-frame")]
    Incomplete,
    #[error("payload of {0} bytes exceeds the 24-bit length field")]
    PayloadTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Serializes one frame: channel id, big-endian 24-bit length, payload.
pub fn encode_frame(channel: Channel, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(TransportError::PayloadTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(channel.as_u8());
    frame.push((payload.len() >> 16) as u8);
    frame.push((payload.len() >> 8) as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Splits one frame off the front of `bytes`. Returns the channel id, the
/// payload slice, and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(u8, &[u8], usize), TransportError> {
    if bytes.len() < HEADER_LEN {
        return Err(TransportError::Incomplete);
    }
    let len = ((bytes[1] as usize) << 16) | ((bytes[2] as usize) << 8) | bytes[3] as usize;
    let end = HEADER_LEN + len;
    if bytes.len() < end {
        return Err(TransportError::Incomplete);
    }
    Ok((bytes[0], &bytes[HEADER_LEN..end], end))
}

/// Reads one frame. A clean close before any header byte is `PeerClosed`; a
/// close inside the header or payload is `Incomplete`.
pub async fn read_frame<R>(reader: &mut R) -> Result<(u8, Vec<u8>), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]).await {
            Ok(0) if filled == 0 => return Err(TransportError::PeerClosed),
            Ok(0) => return Err(TransportError::Incomplete),
            Ok(n) => filled += n,
            Err(err) => return Err(err.into()),
        }
    }
    let len = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok((header[0], payload)),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::Incomplete),
        Err(err) => Err(err.into()),
    }
}
