//! Per-connection decode state between client events and the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use super::{ConnectionConfig, SyncMode};
use crate::media::{
    AudioOutput, CodecId, Decoder, FrameBuffer, MediaBackend, MediaSink, VideoOutput, monotonic_ns,
};
use crate::message::{AudioData, Metadata, VideoData};

#[derive(Default)]
struct DecodeState {
    video_codec: CodecId,
    width: u32,
    height: u32,
    audio_codec: CodecId,
    sample_rate: u32,
    sample_size: u32,
    video: Option<Box<dyn Decoder>>,
    audio: Option<Box<dyn Decoder>>,
    keyframe_seen: bool,
}

pub(crate) struct MediaPipeline {
    address: String,
    hw_accel: bool,
    wait_i_frame: bool,
    sync_mode: SyncMode,
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn MediaSink>,
    active: AtomicBool,
    state: Mutex<DecodeState>,
    frames: Mutex<Option<Box<dyn FrameBuffer>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MediaPipeline {
    pub(crate) fn new(
        config: &ConnectionConfig,
        backend: Arc<dyn MediaBackend>,
        sink: Arc<dyn MediaSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            address: config.address.clone(),
            hw_accel: config.hw_accel,
            wait_i_frame: config.wait_i_frame,
            sync_mode: config.sync_mode,
            backend,
            sink,
            active: AtomicBool::new(false),
            state: Mutex::new(DecodeState::default()),
            frames: Mutex::new(None),
        })
    }

    /// Create and start a fresh frame buffer wired back into this pipeline.
    pub(crate) fn start(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut buffer = self.backend.frame_buffer();
        buffer.set_frame_callback(Arc::new(move |frame: VideoData| {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.decode_video(frame);
            }
        }));
        buffer.start();

        *lock(&self.state) = DecodeState::default();
        let old = lock(&self.frames).replace(buffer);
        self.active.store(true, Ordering::SeqCst);
        if let Some(mut old) = old {
            old.stop();
        }
    }

    /// Stop the frame buffer and drop both decoders.
    pub(crate) fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        let buffer = lock(&self.frames).take();
        if let Some(mut buffer) = buffer {
            buffer.stop();
        }
        let mut state = lock(&self.state);
        state.video = None;
        state.audio = None;
        state.keyframe_seen = false;
    }

    fn timestamp(&self, pts: u64) -> u64 {
        match self.sync_mode {
            SyncMode::Internal => monotonic_ns(),
            SyncMode::SspTimestamp => pts.saturating_mul(1000),
        }
    }

    pub(crate) fn on_metadata(&self, meta: &Metadata) {
        let (v, a, s) = (&meta.video, &meta.audio, &meta.session);
        info!(
            address = %self.address,
            encoder = v.encoder, gop = v.gop, width = v.width, height = v.height,
            timescale = v.timescale, unit = v.unit,
            "video meta"
        );
        info!(
            address = %self.address,
            encoder = a.encoder, bitrate = a.bitrate, channel = a.channel,
            sample_rate = a.sample_rate, sample_size = a.sample_size,
            timescale = a.timescale, unit = a.unit,
            "audio meta"
        );
        info!(
            address = %self.address,
            pts_is_wall_clock = s.pts_is_wall_clock, tc_drop_frame = s.tc_drop_frame,
            timecode = s.timecode,
            "session meta"
        );

        let mut state = lock(&self.state);
        state.video_codec = CodecId::from_video_encoder(v.encoder);
        state.width = v.width;
        state.height = v.height;
        state.audio_codec = CodecId::from_audio_encoder(a.encoder);
        state.sample_rate = a.sample_rate;
        state.sample_size = a.sample_size;
    }

    pub(crate) fn enqueue_video(&self, frame: VideoData) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let frames = lock(&self.frames);
        if let Some(buffer) = frames.as_ref() {
            let pts = frame.pts;
            let keyframe = frame.is_keyframe();
            buffer.enqueue(frame, pts, keyframe);
        }
    }

    fn decode_video(&self, frame: VideoData) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let mut state = lock(&self.state);
        if state.video.is_none() {
            match self.backend.video_decoder(state.video_codec, self.hw_accel) {
                Ok(dec) => state.video = Some(dec),
                Err(e) => {
                    warn!(address = %self.address, "could not initialise video decoder: {e}");
                    return;
                }
            }
        }

        if self.wait_i_frame && !state.keyframe_seen {
            if !frame.is_keyframe() {
                return;
            }
            state.keyframe_seen = true;
        }

        let Some(decoder) = state.video.as_mut() else {
            return;
        };
        let data = match decoder.decode(&frame.data, frame.pts) {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                warn!(address = %self.address, frame_no = frame.frame_no, "dropping video frame: {e}");
                return;
            }
        };

        let output = VideoOutput {
            codec: state.video_codec,
            width: state.width,
            height: state.height,
            keyframe: frame.is_keyframe(),
            timestamp_ns: self.timestamp(frame.pts),
            data,
        };
        drop(state);
        self.sink.on_video(output);
    }

    pub(crate) fn on_audio(&self, audio: AudioData) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let mut state = lock(&self.state);
        if state.audio.is_none() {
            match self.backend.audio_decoder(state.audio_codec) {
                Ok(dec) => state.audio = Some(dec),
                Err(e) => {
                    debug!(address = %self.address, "could not initialise audio decoder: {e}");
                    return;
                }
            }
        }

        let Some(decoder) = state.audio.as_mut() else {
            return;
        };
        let data = match decoder.decode(&audio.data, audio.pts) {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                warn!(address = %self.address, "dropping audio block: {e}");
                return;
            }
        };

        let output = AudioOutput {
            codec: state.audio_codec,
            sample_rate: state.sample_rate,
            sample_size: state.sample_size,
            timestamp_ns: self.timestamp(audio.pts),
            data,
        };
        drop(state);
        if self.active.load(Ordering::SeqCst) {
            self.sink.on_audio(output);
        }
    }
}
