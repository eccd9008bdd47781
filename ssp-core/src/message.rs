//! Pipe protocol message types and typed payloads.
//!
//! Every frame on the helper's stdout is an 8-byte header followed by a
//! type-specific payload. All integers are little-endian.
//!
//! ```text
//! type:    u32  (4)
//! length:  u32  (4)
//! payload: [u8] (length)
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::SspError;

/// Size of the frame header on the wire.
pub const HEADER_SIZE: usize = 8;

/// Largest payload the codec accepts (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// H.264/H.265 NAL type reported by the helper for IDR frames.
pub const FRAME_TYPE_IDR: u32 = 5;

// ── MessageType ──────────────────────────────────────────────────

/// Discriminant of a pipe frame.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Helper is up and about to connect to the device.
    ConnectorOk = 0,
    /// Stream metadata (codec, resolution, timescale).
    MetaData = 1,
    /// One compressed video access unit.
    VideoData = 2,
    /// One compressed audio access unit.
    AudioData = 3,
    /// Helper-side receive buffer overflowed.
    RecvBufferFull = 4,
    /// Device session ended.
    Disconnect = 5,
    /// Device session established.
    ConnectionConnected = 6,
    /// Helper-side error with a code and description.
    Exception = 7,
}

impl TryFrom<u32> for MessageType {
    type Error = SspError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::ConnectorOk),
            1 => Ok(MessageType::MetaData),
            2 => Ok(MessageType::VideoData),
            3 => Ok(MessageType::AudioData),
            4 => Ok(MessageType::RecvBufferFull),
            5 => Ok(MessageType::Disconnect),
            6 => Ok(MessageType::ConnectionConnected),
            7 => Ok(MessageType::Exception),
            _ => Err(SspError::UnknownVariant {
                type_name: "MessageType",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Message ──────────────────────────────────────────────────────

/// One decoded pipe frame: a type and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageType,
    payload: Bytes,
}

impl Message {
    pub fn new(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A header-only frame.
    pub fn empty(kind: MessageType) -> Self {
        Self::new(kind, Bytes::new())
    }

    pub fn video(data: &VideoData) -> Self {
        Self::new(MessageType::VideoData, data.encode())
    }

    pub fn audio(data: &AudioData) -> Self {
        Self::new(MessageType::AudioData, data.encode())
    }

    pub fn metadata(meta: &Metadata) -> Self {
        Self::new(MessageType::MetaData, meta.encode())
    }

    pub fn exception(info: &ExceptionInfo) -> Self {
        Self::new(MessageType::Exception, info.encode())
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialize header and payload into `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<(), SspError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(SspError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_u32_le(self.kind as u32);
        dst.put_u32_le(self.payload.len() as u32);
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, SspError> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

fn ensure_len(kind: &'static str, buf: &[u8], needed: usize) -> Result<(), SspError> {
    if buf.len() < needed {
        return Err(SspError::InvalidPayload {
            kind,
            reason: format!("{} bytes, need {}", buf.len(), needed),
        });
    }
    Ok(())
}

// ── VideoData ────────────────────────────────────────────────────

/// A compressed video access unit.
///
/// ```text
/// frame_no:       u32  (4)
/// ntp_timestamp:  u64  (8)
/// pts:            u64  (8)
/// frame_type:     u32  (4)
/// len:            u32  (4)
/// data:           [u8] (len)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoData {
    pub frame_no: u32,
    pub ntp_timestamp: u64,
    pub pts: u64,
    pub frame_type: u32,
    pub data: Bytes,
}

impl VideoData {
    pub const PREFIX: usize = 28;

    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FRAME_TYPE_IDR
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::PREFIX + self.data.len());
        buf.put_u32_le(self.frame_no);
        buf.put_u64_le(self.ntp_timestamp);
        buf.put_u64_le(self.pts);
        buf.put_u32_le(self.frame_type);
        buf.put_u32_le(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, SspError> {
        ensure_len("video", payload, Self::PREFIX)?;
        let mut buf = payload.clone();
        let frame_no = buf.get_u32_le();
        let ntp_timestamp = buf.get_u64_le();
        let pts = buf.get_u64_le();
        let frame_type = buf.get_u32_le();
        let len = buf.get_u32_le() as usize;
        ensure_len("video", &buf, len)?;
        Ok(Self {
            frame_no,
            ntp_timestamp,
            pts,
            frame_type,
            data: buf.split_to(len),
        })
    }
}

// ── AudioData ────────────────────────────────────────────────────

/// A compressed audio access unit.
///
/// ```text
/// ntp_timestamp:  u64  (8)
/// pts:            u64  (8)
/// len:            u32  (4)
/// data:           [u8] (len)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub ntp_timestamp: u64,
    pub pts: u64,
    pub data: Bytes,
}

impl AudioData {
    pub const PREFIX: usize = 20;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::PREFIX + self.data.len());
        buf.put_u64_le(self.ntp_timestamp);
        buf.put_u64_le(self.pts);
        buf.put_u32_le(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, SspError> {
        ensure_len("audio", payload, Self::PREFIX)?;
        let mut buf = payload.clone();
        let ntp_timestamp = buf.get_u64_le();
        let pts = buf.get_u64_le();
        let len = buf.get_u32_le() as usize;
        ensure_len("audio", &buf, len)?;
        Ok(Self {
            ntp_timestamp,
            pts,
            data: buf.split_to(len),
        })
    }
}

// ── Metadata ─────────────────────────────────────────────────────

/// Video encoder id: H.264.
pub const VIDEO_ENCODER_H264: u32 = 1;
/// Video encoder id: H.265.
pub const VIDEO_ENCODER_H265: u32 = 2;
/// Audio encoder id: AAC.
pub const AUDIO_ENCODER_AAC: u32 = 1;
/// Audio encoder id: PCM.
pub const AUDIO_ENCODER_PCM: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoMeta {
    pub encoder: u32,
    pub gop: u32,
    pub width: u32,
    pub height: u32,
    pub timescale: u32,
    pub unit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioMeta {
    pub encoder: u32,
    pub bitrate: u32,
    pub channel: u32,
    pub sample_rate: u32,
    pub sample_size: u32,
    pub timescale: u32,
    pub unit: u32,
}

/// Session-level flag block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionMeta {
    pub pts_is_wall_clock: u32,
    pub tc_drop_frame: u32,
    pub timecode: u32,
}

/// Stream description sent once per session, before media frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub video: VideoMeta,
    pub audio: AudioMeta,
    pub session: SessionMeta,
}

impl Metadata {
    pub const SIZE: usize = 64;

    pub fn encode(&self) -> Bytes {
        let v = &self.video;
        let a = &self.audio;
        let s = &self.session;
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        for field in [v.encoder, v.gop, v.width, v.height, v.timescale, v.unit] {
            buf.put_u32_le(field);
        }
        for field in [
            a.encoder,
            a.bitrate,
            a.channel,
            a.sample_rate,
            a.sample_size,
            a.timescale,
            a.unit,
        ] {
            buf.put_u32_le(field);
        }
        for field in [s.pts_is_wall_clock, s.tc_drop_frame, s.timecode] {
            buf.put_u32_le(field);
        }
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, SspError> {
        ensure_len("metadata", payload, Self::SIZE)?;
        let mut buf = payload.clone();
        let video = VideoMeta {
            encoder: buf.get_u32_le(),
            gop: buf.get_u32_le(),
            width: buf.get_u32_le(),
            height: buf.get_u32_le(),
            timescale: buf.get_u32_le(),
            unit: buf.get_u32_le(),
        };
        let audio = AudioMeta {
            encoder: buf.get_u32_le(),
            bitrate: buf.get_u32_le(),
            channel: buf.get_u32_le(),
            sample_rate: buf.get_u32_le(),
            sample_size: buf.get_u32_le(),
            timescale: buf.get_u32_le(),
            unit: buf.get_u32_le(),
        };
        let session = SessionMeta {
            pts_is_wall_clock: buf.get_u32_le(),
            tc_drop_frame: buf.get_u32_le(),
            timecode: buf.get_u32_le(),
        };
        Ok(Self {
            video,
            audio,
            session,
        })
    }
}

// ── ExceptionInfo ────────────────────────────────────────────────

/// Helper-side error report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub code: i32,
    pub description: String,
}

impl ExceptionInfo {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.description.len());
        buf.put_i32_le(self.code);
        buf.extend_from_slice(self.description.as_bytes());
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, SspError> {
        ensure_len("exception", payload, 4)?;
        let mut buf = payload.clone();
        let code = buf.get_i32_le();
        let text = String::from_utf8_lossy(&buf);
        Ok(Self {
            code,
            description: text.trim_end_matches('\0').to_string(),
        })
    }
}
