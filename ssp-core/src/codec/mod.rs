//! Pipe frame codec.
//!
//! [`read_message`] pulls exactly one frame from an `AsyncRead` without
//! buffering across calls; the receive loop uses it so that closing the
//! pipe is observed at a frame boundary. [`SspCodec`] is the
//! `tokio_util` framed variant used by tooling that writes frames.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SspError;
use crate::message::{HEADER_SIZE, MAX_PAYLOAD_SIZE, Message, MessageType};

/// Read until `buf` is full or the source reports EOF.
///
/// Returns the number of bytes actually read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut pos = 0;
    while pos < buf.len() {
        let n = reader.read(&mut buf[pos..]).await?;
        if n == 0 {
            break;
        }
        pos += n;
    }
    Ok(pos)
}

/// Read exactly one frame.
///
/// A source that closes before a full header or a full body has been
/// read yields [`SspError::Framing`]; a zero-length payload is valid.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, SspError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut header).await?;
    if got != HEADER_SIZE {
        return Err(SspError::Framing {
            expected: HEADER_SIZE,
            actual: got,
        });
    }

    let kind = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let kind = MessageType::try_from(kind)?;

    if length > MAX_PAYLOAD_SIZE {
        return Err(SspError::PayloadTooLarge {
            size: length,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    if length == 0 {
        return Ok(Message::empty(kind));
    }

    let mut body = vec![0u8; length];
    let got = read_full(reader, &mut body).await?;
    if got != length {
        return Err(SspError::Framing {
            expected: length,
            actual: got,
        });
    }
    Ok(Message::new(kind, body))
}

// ── SspCodec ─────────────────────────────────────────────────────

/// Framed codec for the pipe protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct SspCodec;

impl Decoder for SspCodec {
    type Item = Message;
    type Error = SspError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let kind = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let length = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        let kind = MessageType::try_from(kind)?;

        if length > MAX_PAYLOAD_SIZE {
            return Err(SspError::PayloadTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();
        Ok(Some(Message::new(kind, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => {
                let expected = if src.len() < HEADER_SIZE {
                    HEADER_SIZE
                } else {
                    HEADER_SIZE + u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize
                };
                Err(SspError::Framing {
                    expected,
                    actual: src.len(),
                })
            }
        }
    }
}

impl Encoder<Message> for SspCodec {
    type Error = SspError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst)
    }
}
