//! Frame codec: length-prefixed envelopes.
//!
//! A frame is a 4-byte big-endian payload length followed by the envelope's
//! JSON text. [`decode_frame`] is a pure function over a byte slice so it can
//! be re-run against a growing buffer; [`FrameCodec`] plugs it into
//! `tokio_util` framed streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Envelope;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Largest payload a peer may declare.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Framing errors. Only these close a connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("Envelope serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of inspecting a buffer for one frame.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    /// A complete envelope occupying the first `consumed` bytes.
    Frame { envelope: Envelope, consumed: usize },
    /// The buffer does not yet hold a whole frame; nothing was consumed.
    NeedMoreData,
    /// A complete frame whose payload did not parse. The caller skips
    /// `consumed` bytes and keeps the connection.
    Malformed { consumed: usize, reason: String },
}

/// Encode one envelope as a complete frame.
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let payload = serde_json::to_vec(envelope)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Try to take one frame off the front of `buf`.
pub fn decode_frame(buf: &[u8]) -> Result<Decoded, CodecError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(Decoded::NeedMoreData);
    }
    let mut header = [0u8; LENGTH_PREFIX];
    header.copy_from_slice(&buf[..LENGTH_PREFIX]);
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let total = LENGTH_PREFIX + len;
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    Ok(match Envelope::from_slice(&buf[LENGTH_PREFIX..total]) {
        Ok(envelope) => Decoded::Frame {
            envelope,
            consumed: total,
        },
        Err(e) => Decoded::Malformed {
            consumed: total,
            reason: e.to_string(),
        },
    })
}

/// An item produced by [`FrameCodec`].
#[derive(Debug, PartialEq)]
pub enum Frame {
    Envelope(Envelope),
    /// A dropped frame and the parse error that caused it.
    Malformed(String),
}

/// `tokio_util` codec over [`decode_frame`] and [`encode`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        match decode_frame(src)? {
            Decoded::NeedMoreData => {
                if src.len() >= LENGTH_PREFIX {
                    let mut header = [0u8; LENGTH_PREFIX];
                    header.copy_from_slice(&src[..LENGTH_PREFIX]);
                    let total = LENGTH_PREFIX + u32::from_be_bytes(header) as usize;
                    src.reserve(total - src.len());
                }
                Ok(None)
            }
            Decoded::Frame { envelope, consumed } => {
                src.advance(consumed);
                Ok(Some(Frame::Envelope(envelope)))
            }
            Decoded::Malformed { consumed, reason } => {
                src.advance(consumed);
                Ok(Some(Frame::Malformed(reason)))
            }
        }
    }
}

impl Encoder<Envelope> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let frame = encode(&item)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
