//! In-memory collaborators shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::context::SspContext;
use crate::control::{
    ConfigKey, ConfigValue, ControlReply, ControlResult, DeviceControl, DeviceControlFactory,
    StreamAttr, StreamInfo,
};
use crate::error::SspError;
use crate::media::{AudioOutput, MediaSink, VideoOutput};
use crate::message::Message;
use crate::transport::{Launcher, Transport};

/// Launcher whose transports are in-memory pipes. Tests write frames
/// into the far end obtained from [`writer`](Self::writer).
#[derive(Default)]
pub struct PipeLauncher {
    writers: Mutex<Vec<DuplexStream>>,
    launches: AtomicUsize,
    completed: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl PipeLauncher {
    /// Take the write end of the `n`th unclaimed pipe.
    pub fn writer(&self, n: usize) -> DuplexStream {
        self.writers.lock().unwrap().remove(n)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Launches that ran to the end, failed or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every following launch take `delay` before it returns.
    pub fn delay_launches(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Launcher for PipeLauncher {
    async fn launch(&self, _address: &str) -> Result<Transport, SspError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SspError::TransportLaunch {
                program: "pipe".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        self.writers.lock().unwrap().push(writer);
        Ok(Transport::from_reader(reader))
    }
}

#[derive(Default)]
pub struct CollectSink {
    pub video: Mutex<Vec<VideoOutput>>,
    pub audio: Mutex<Vec<AudioOutput>>,
}

impl MediaSink for CollectSink {
    fn on_video(&self, frame: VideoOutput) {
        self.video.lock().unwrap().push(frame);
    }

    fn on_audio(&self, frame: AudioOutput) {
        self.audio.lock().unwrap().push(frame);
    }
}

/// Camera stand-in. Every request is appended to a shared log; requests
/// named through [`refuse`](Self::refuse) get a refused reply.
pub struct MockControl {
    model: String,
    stream_status: Mutex<String>,
    refused: Mutex<HashSet<String>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockControl {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            stream_status: Mutex::new("idle".into()),
            refused: Mutex::new(HashSet::new()),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `op` is the request name, optionally followed by `:<key>`,
    /// e.g. `get_info` or `set_config:project_fps`.
    pub fn refuse(&self, op: &str) {
        self.refused.lock().unwrap().insert(op.to_string());
    }

    pub fn set_stream_status(&self, status: &str) {
        *self.stream_status.lock().unwrap() = status.to_string();
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    fn reply<T>(&self, op: &str, entry: String, value: T) -> ControlResult<T> {
        self.log.lock().unwrap().push(entry);
        if self.refused.lock().unwrap().contains(op) {
            return Ok(ControlReply {
                status_code: 500,
                code: -1,
                value,
            });
        }
        Ok(ControlReply::ok(value))
    }
}

#[async_trait]
impl DeviceControl for MockControl {
    async fn get_info(&self) -> ControlResult<String> {
        let info = format!(
            r#"{{"model":"{}","cameraName":"cam","nickName":"A"}}"#,
            self.model
        );
        self.reply("get_info", "get_info".into(), info)
    }

    async fn get_config(&self, key: ConfigKey) -> ControlResult<ConfigValue> {
        let value = match key {
            ConfigKey::MovieResolution => ConfigValue {
                current: "4K".into(),
                choices: vec!["4K".into(), "C4K".into(), "4K (Low Noise)".into()],
            },
            ConfigKey::ProjectFps => ConfigValue {
                current: "29.97".into(),
                choices: vec!["23.98".into(), "25".into(), "29.97".into(), "59.94".into()],
            },
            ConfigKey::SendStream => ConfigValue {
                current: "stream1".into(),
                choices: vec!["Stream0".into(), "Stream1".into()],
            },
            ConfigKey::Led => ConfigValue {
                current: "On".into(),
                choices: vec!["On".into(), "Off".into()],
            },
        };
        let op = format!("get_config:{key}");
        self.reply(&op, op.clone(), value)
    }

    async fn set_config(&self, key: ConfigKey, value: &str) -> ControlResult<()> {
        let op = format!("set_config:{key}");
        self.reply(&op, format!("{op}={value}"), ())
    }

    async fn get_stream_info(&self, index: &str) -> ControlResult<StreamInfo> {
        let info = StreamInfo {
            stream_index: index.to_string(),
            status: self.stream_status.lock().unwrap().clone(),
            encoder_type: "h264".into(),
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 20_000,
            gop: 10,
        };
        self.reply("get_stream_info", format!("get_stream_info:{index}"), info)
    }

    async fn set_send_stream(&self, index: &str) -> ControlResult<()> {
        self.reply("set_send_stream", format!("set_send_stream:{index}"), ())
    }

    async fn set_stream_attr(&self, attr: &StreamAttr) -> ControlResult<()> {
        let entry = format!(
            "set_stream_attr:{} {}x{}@{} {} gop{}",
            attr.index, attr.width, attr.height, attr.fps, attr.bitrate, attr.gop
        );
        self.reply("set_stream_attr", entry, ())
    }

    async fn set_stream_bitrate(&self, index: &str, bitrate: u64) -> ControlResult<()> {
        let entry = format!("set_stream_bitrate:{index}={bitrate}");
        self.reply("set_stream_bitrate", entry, ())
    }
}

pub fn mock_factory(model: &'static str) -> DeviceControlFactory {
    Arc::new(move |_: &str| -> Result<Box<dyn DeviceControl>, SspError> {
        Ok(Box::new(MockControl::new(model)))
    })
}

/// Wire bytes of `msg`, header included.
pub fn frame(msg: Message) -> Vec<u8> {
    msg.to_bytes().unwrap().to_vec()
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// A context on the current runtime with in-memory collaborators and
/// the default backoff schedule.
pub fn test_context() -> (Arc<SspContext>, Arc<PipeLauncher>) {
    let launcher = Arc::new(PipeLauncher::default());
    let ctx = SspContext::builder(launcher.clone())
        .device_control(mock_factory("P2"))
        .build()
        .unwrap();
    (ctx, launcher)
}
