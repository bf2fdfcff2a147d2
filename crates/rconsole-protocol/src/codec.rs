//! Length-prefixed JSON framing.
//!
//! A frame is a big-endian `u32` payload length followed by the JSON encoding
//! of one `Message`.

use std::io::Read;
use std::io::Write;

use crate::error::TransportError;
use crate::message::Message;

pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const HEADER_BYTES: usize = 4;

pub fn encode_frame(message: &Message) -> Result<Vec<u8>, TransportError> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Writes one frame with a single `write_all` so frames never interleave
/// under a shared writer lock.
pub fn write_frame<W: Write>(writer: &mut W, message: &Message) -> Result<(), TransportError> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Message, TransportError> {
    let mut header = [0u8; HEADER_BYTES];
    reader.read_exact(&mut header)?;

    let size = u32::from_be_bytes(header) as usize;
    if size > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            size,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}
