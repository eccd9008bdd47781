//! Typed events produced by the receive loop and their dispatch.

use crate::error::SspError;
use crate::message::{AudioData, ExceptionInfo, Message, MessageType, Metadata, VideoData};

/// One decoded frame from the helper, as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Metadata(Metadata),
    Video(VideoData),
    Audio(AudioData),
    BufferFull,
    Connected,
    Disconnected,
    Exception { code: i32, description: String },
}

impl ClientEvent {
    /// Decode a post-handshake frame.
    ///
    /// Returns `Ok(None)` for frames that carry nothing for consumers
    /// (a repeated `ConnectorOk`).
    pub fn from_message(msg: &Message) -> Result<Option<Self>, SspError> {
        let event = match msg.kind() {
            MessageType::ConnectorOk => return Ok(None),
            MessageType::MetaData => Self::Metadata(Metadata::decode(msg.payload())?),
            MessageType::VideoData => Self::Video(VideoData::decode(msg.payload())?),
            MessageType::AudioData => Self::Audio(AudioData::decode(msg.payload())?),
            MessageType::RecvBufferFull => Self::BufferFull,
            MessageType::Disconnect => Self::Disconnected,
            MessageType::ConnectionConnected => Self::Connected,
            MessageType::Exception => {
                let info = ExceptionInfo::decode(msg.payload())?;
                Self::Exception {
                    code: info.code,
                    description: info.description,
                }
            }
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata",
            Self::Video(_) => "video",
            Self::Audio(_) => "audio",
            Self::BufferFull => "buffer-full",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Exception { .. } => "exception",
        }
    }
}

// ── EventHandler ─────────────────────────────────────────────────

/// Receives events synchronously on the receive task.
///
/// Implementations must not block for long and must never wait on the
/// owning client's lifecycle (start/stop), or `stop()` would deadlock
/// joining the receive task.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: ClientEvent);
}

impl<F> EventHandler for F
where
    F: Fn(ClientEvent) + Send + Sync,
{
    fn on_event(&self, event: ClientEvent) {
        self(event)
    }
}

type Callback<T> = Box<dyn Fn(T) + Send + Sync + 'static>;

/// Per-kind callback registry. Unset callbacks drop their events.
#[derive(Default)]
pub struct ClientCallbacks {
    metadata: Option<Callback<Metadata>>,
    video: Option<Callback<VideoData>>,
    audio: Option<Callback<AudioData>>,
    buffer_full: Option<Callback<()>>,
    connected: Option<Callback<()>>,
    disconnected: Option<Callback<()>>,
    exception: Option<Callback<(i32, String)>>,
}

impl ClientCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_metadata(mut self, f: impl Fn(Metadata) + Send + Sync + 'static) -> Self {
        self.metadata = Some(Box::new(f));
        self
    }

    pub fn on_video(mut self, f: impl Fn(VideoData) + Send + Sync + 'static) -> Self {
        self.video = Some(Box::new(f));
        self
    }

    pub fn on_audio(mut self, f: impl Fn(AudioData) + Send + Sync + 'static) -> Self {
        self.audio = Some(Box::new(f));
        self
    }

    pub fn on_buffer_full(mut self, f: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.buffer_full = Some(Box::new(f));
        self
    }

    pub fn on_connected(mut self, f: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.connected = Some(Box::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Box::new(f));
        self
    }

    pub fn on_exception(mut self, f: impl Fn((i32, String)) + Send + Sync + 'static) -> Self {
        self.exception = Some(Box::new(f));
        self
    }
}

impl EventHandler for ClientCallbacks {
    fn on_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Metadata(m) => {
                if let Some(cb) = &self.metadata {
                    cb(m)
                }
            }
            ClientEvent::Video(v) => {
                if let Some(cb) = &self.video {
                    cb(v)
                }
            }
            ClientEvent::Audio(a) => {
                if let Some(cb) = &self.audio {
                    cb(a)
                }
            }
            ClientEvent::BufferFull => {
                if let Some(cb) = &self.buffer_full {
                    cb(())
                }
            }
            ClientEvent::Connected => {
                if let Some(cb) = &self.connected {
                    cb(())
                }
            }
            ClientEvent::Disconnected => {
                if let Some(cb) = &self.disconnected {
                    cb(())
                }
            }
            ClientEvent::Exception { code, description } => {
                if let Some(cb) = &self.exception {
                    cb((code, description))
                }
            }
        }
    }
}
