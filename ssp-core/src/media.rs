//! Media collaborators: decoders, the video frame buffer and the sink
//! that receives decoded output.
//!
//! A [`MediaBackend`] builds decoders and frame buffers for each
//! connection. The pass-through implementations hand compressed access
//! units straight to the sink, which is what the headless host and the
//! tests use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SspError;
use crate::message::{
    AUDIO_ENCODER_AAC, AUDIO_ENCODER_PCM, VIDEO_ENCODER_H264, VIDEO_ENCODER_H265, VideoData,
};

// ── CodecId ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    #[default]
    None,
    H264,
    H265,
    Aac,
    Pcm,
}

impl CodecId {
    /// Video codec announced in a metadata frame. Anything that is not
    /// H.264 is treated as H.265.
    pub fn from_video_encoder(encoder: u32) -> Self {
        match encoder {
            VIDEO_ENCODER_H264 => Self::H264,
            VIDEO_ENCODER_H265 => Self::H265,
            _ => Self::H265,
        }
    }

    /// Audio codec announced in a metadata frame. Only AAC is decodable.
    pub fn from_audio_encoder(encoder: u32) -> Self {
        match encoder {
            AUDIO_ENCODER_AAC => Self::Aac,
            AUDIO_ENCODER_PCM => Self::None,
            _ => Self::None,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Self::Aac | Self::Pcm)
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Aac => "aac",
            Self::Pcm => "pcm",
        };
        f.write_str(name)
    }
}

// ── Output ───────────────────────────────────────────────────────

/// A decoded video frame ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutput {
    pub codec: CodecId,
    pub width: u32,
    pub height: u32,
    pub keyframe: bool,
    pub timestamp_ns: u64,
    pub data: Bytes,
}

/// A decoded audio block ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioOutput {
    pub codec: CodecId,
    pub sample_rate: u32,
    pub sample_size: u32,
    pub timestamp_ns: u64,
    pub data: Bytes,
}

/// Nanoseconds on a process-wide monotonic clock.
pub fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

// ── Collaborator traits ──────────────────────────────────────────

/// Turns compressed access units into decoded output.
pub trait Decoder: Send {
    fn codec(&self) -> CodecId;

    /// Decode one access unit. `Ok(None)` means the decoder needs more
    /// input before it can produce a frame.
    fn decode(&mut self, data: &Bytes, pts: u64) -> Result<Option<Bytes>, SspError>;
}

pub type FrameCallback = Arc<dyn Fn(VideoData) + Send + Sync>;

/// Paces compressed video frames before decode.
pub trait FrameBuffer: Send {
    fn set_frame_callback(&mut self, callback: FrameCallback);
    fn start(&mut self);
    fn enqueue(&self, frame: VideoData, pts: u64, is_keyframe: bool);
    fn stop(&mut self);
}

/// Builds per-connection decoders and frame buffers.
pub trait MediaBackend: Send + Sync {
    fn video_decoder(&self, codec: CodecId, hw_accel: bool) -> Result<Box<dyn Decoder>, SspError>;
    fn audio_decoder(&self, codec: CodecId) -> Result<Box<dyn Decoder>, SspError>;
    fn frame_buffer(&self) -> Box<dyn FrameBuffer>;
}

/// Consumer of decoded media. Called from the receive task; must not block.
pub trait MediaSink: Send + Sync {
    fn on_video(&self, frame: VideoOutput);
    fn on_audio(&self, frame: AudioOutput);
}

// ── Pass-through implementations ─────────────────────────────────

/// Emits every access unit unchanged.
#[derive(Debug)]
pub struct PassthroughDecoder {
    codec: CodecId,
}

impl PassthroughDecoder {
    pub fn new(codec: CodecId) -> Result<Self, SspError> {
        if codec == CodecId::None {
            return Err(SspError::Decode("no codec to initialise".into()));
        }
        Ok(Self { codec })
    }
}

impl Decoder for PassthroughDecoder {
    fn codec(&self) -> CodecId {
        self.codec
    }

    fn decode(&mut self, data: &Bytes, _pts: u64) -> Result<Option<Bytes>, SspError> {
        if data.is_empty() {
            return Err(SspError::Decode(format!("empty {} access unit", self.codec)));
        }
        Ok(Some(data.clone()))
    }
}

/// Forwards each frame to the callback on the enqueuing thread.
#[derive(Default)]
pub struct DirectFrameBuffer {
    callback: Option<FrameCallback>,
    started: AtomicBool,
}

impl FrameBuffer for DirectFrameBuffer {
    fn set_frame_callback(&mut self, callback: FrameCallback) {
        self.callback = Some(callback);
    }

    fn start(&mut self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn enqueue(&self, frame: VideoData, _pts: u64, _is_keyframe: bool) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        if let Some(cb) = &self.callback {
            cb(frame);
        }
    }

    fn stop(&mut self) {
        self.started.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughBackend;

impl MediaBackend for PassthroughBackend {
    fn video_decoder(&self, codec: CodecId, _hw_accel: bool) -> Result<Box<dyn Decoder>, SspError> {
        if !codec.is_video() {
            return Err(SspError::Decode(format!("{codec} is not a video codec")));
        }
        Ok(Box::new(PassthroughDecoder::new(codec)?))
    }

    fn audio_decoder(&self, codec: CodecId) -> Result<Box<dyn Decoder>, SspError> {
        if !codec.is_audio() {
            return Err(SspError::Decode(format!("{codec} is not an audio codec")));
        }
        Ok(Box::new(PassthroughDecoder::new(codec)?))
    }

    fn frame_buffer(&self) -> Box<dyn FrameBuffer> {
        Box::new(DirectFrameBuffer::default())
    }
}
