//! End-to-end tests: scripted helper transports driving connections,
//! the reconnect coordinator and shared device statuses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ssp_core::control::{
    ConfigKey, ConfigValue, ControlReply, ControlResult, StreamAttr, StreamInfo,
};
use ssp_core::media::{AudioOutput, VideoOutput};
use ssp_core::message::{
    AUDIO_ENCODER_AAC, FRAME_TYPE_IDR, Metadata, VIDEO_ENCODER_H264, VideoData,
};
use ssp_core::{
    BackoffPolicy, CodecId, Connection, ConnectionConfig, DeviceControl, DeviceControlFactory,
    Launcher, MediaSink, Message, MessageType, SourceSettings, SspContext, SspError,
    StreamSource, Transport, UpdateOutcome,
};
use tokio::io::{AsyncWriteExt, DuplexStream};

// ── Helpers ──────────────────────────────────────────────────────

/// Launcher that hands out in-memory pipes and keeps the write ends.
#[derive(Default)]
struct ScriptedLauncher {
    writers: Mutex<Vec<DuplexStream>>,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    fn next_writer(&self) -> DuplexStream {
        self.writers.lock().unwrap().remove(0)
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self, _address: &str) -> Result<Transport, SspError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        self.writers.lock().unwrap().push(writer);
        Ok(Transport::from_reader(reader))
    }
}

#[derive(Default)]
struct Frames {
    video: Mutex<Vec<VideoOutput>>,
    audio: Mutex<Vec<AudioOutput>>,
}

impl MediaSink for Frames {
    fn on_video(&self, frame: VideoOutput) {
        self.video.lock().unwrap().push(frame);
    }

    fn on_audio(&self, frame: AudioOutput) {
        self.audio.lock().unwrap().push(frame);
    }
}

/// Camera that accepts every request.
struct IdleCamera;

#[async_trait]
impl DeviceControl for IdleCamera {
    async fn get_info(&self) -> ControlResult<String> {
        Ok(ControlReply::ok(r#"{"model":"P2","cameraName":"cam"}"#.to_string()))
    }

    async fn get_config(&self, key: ConfigKey) -> ControlResult<ConfigValue> {
        let current = match key {
            ConfigKey::MovieResolution => "4K",
            ConfigKey::ProjectFps => "29.97",
            ConfigKey::SendStream => "stream1",
            ConfigKey::Led => "Off",
        };
        Ok(ControlReply::ok(ConfigValue {
            current: current.into(),
            choices: Vec::new(),
        }))
    }

    async fn set_config(&self, _key: ConfigKey, _value: &str) -> ControlResult<()> {
        Ok(ControlReply::ok(()))
    }

    async fn get_stream_info(&self, index: &str) -> ControlResult<StreamInfo> {
        Ok(ControlReply::ok(StreamInfo {
            stream_index: index.into(),
            status: "idle".into(),
            encoder_type: "h264".into(),
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 20_000,
            gop: 10,
        }))
    }

    async fn set_send_stream(&self, _index: &str) -> ControlResult<()> {
        Ok(ControlReply::ok(()))
    }

    async fn set_stream_attr(&self, _attr: &StreamAttr) -> ControlResult<()> {
        Ok(ControlReply::ok(()))
    }

    async fn set_stream_bitrate(&self, _index: &str, _bitrate: u64) -> ControlResult<()> {
        Ok(ControlReply::ok(()))
    }
}

fn context() -> (Arc<SspContext>, Arc<ScriptedLauncher>) {
    let launcher = Arc::new(ScriptedLauncher::default());
    let factory: DeviceControlFactory =
        Arc::new(|_: &str| -> Result<Box<dyn DeviceControl>, SspError> { Ok(Box::new(IdleCamera)) });
    let ctx = SspContext::builder(launcher.clone())
        .device_control(factory)
        .backoff(BackoffPolicy::default())
        .build()
        .unwrap();
    (ctx, launcher)
}

async fn send(writer: &mut DuplexStream, msg: Message) {
    writer.write_all(&msg.to_bytes().unwrap()).await.unwrap();
}

async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

fn h264_1080p() -> Metadata {
    let mut meta = Metadata::default();
    meta.video.encoder = VIDEO_ENCODER_H264;
    meta.video.width = 1920;
    meta.video.height = 1080;
    meta.audio.encoder = AUDIO_ENCODER_AAC;
    meta.audio.sample_rate = 48_000;
    meta.audio.sample_size = 16;
    meta
}

fn keyframe(frame_no: u32, pts: u64) -> VideoData {
    VideoData {
        frame_no,
        ntp_timestamp: 0,
        pts,
        frame_type: FRAME_TYPE_IDR,
        data: Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]),
    }
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stream_then_reconnect_after_pipe_closes() {
    let (ctx, launcher) = context();
    let sink = Arc::new(Frames::default());
    let conn = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), sink.clone());
    conn.start().await.unwrap();

    let mut writer = launcher.next_writer();
    send(&mut writer, Message::empty(MessageType::ConnectorOk)).await;
    send(&mut writer, Message::metadata(&h264_1080p())).await;
    send(&mut writer, Message::video(&keyframe(1, 1_000))).await;
    settle().await;

    {
        let video = sink.video.lock().unwrap();
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].codec, CodecId::H264);
        assert_eq!((video[0].width, video[0].height), (1920, 1080));
        assert!(video[0].keyframe);
    }

    drop(writer);
    settle().await;
    assert!(ctx.reconnect().is_pending(conn.id()));
    assert_eq!(launcher.launches(), 1);

    tokio::time::advance(Duration::from_millis(2_900)).await;
    settle().await;
    assert_eq!(launcher.launches(), 1);

    tokio::time::advance(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(launcher.launches(), 2);
    assert!(!ctx.reconnect().is_pending(conn.id()));
    assert!(conn.is_running());

    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_cancels_reconnect() {
    let (ctx, launcher) = context();
    let conn = Connection::new(
        &ctx,
        ConnectionConfig::new("10.0.0.5"),
        Arc::new(Frames::default()),
    );
    conn.start().await.unwrap();

    drop(launcher.next_writer());
    settle().await;
    assert!(ctx.reconnect().is_pending(conn.id()));

    conn.stop().await;
    assert!(!ctx.reconnect().is_pending(conn.id()));

    tokio::time::advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_is_not_revived() {
    let (ctx, launcher) = context();
    let conn = Connection::new(
        &ctx,
        ConnectionConfig::new("10.0.0.5"),
        Arc::new(Frames::default()),
    );
    conn.start().await.unwrap();
    drop(launcher.next_writer());
    settle().await;

    drop(conn);
    tokio::time::advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(launcher.launches(), 1);
    assert!(ctx.connections().get("10.0.0.5").is_none());
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_per_attempt() {
    let (ctx, launcher) = context();
    let conn = Connection::new(
        &ctx,
        ConnectionConfig::new("10.0.0.5"),
        Arc::new(Frames::default()),
    );
    conn.start().await.unwrap();

    for (n, secs) in [3u64, 6, 10, 15, 15].into_iter().enumerate() {
        drop(launcher.next_writer());
        settle().await;
        tokio::time::advance(Duration::from_secs(secs) - Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(launcher.launches(), n + 1, "attempt {n} fired early");
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(launcher.launches(), n + 2, "attempt {n} did not fire");
    }
    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn independent_connections_reconnect_independently() {
    let (ctx, launcher) = context();
    let a = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), Arc::new(Frames::default()));
    let b = Connection::new(&ctx, ConnectionConfig::new("10.0.0.6"), Arc::new(Frames::default()));
    a.start().await.unwrap();
    b.start().await.unwrap();

    let wa = launcher.next_writer();
    let wb = launcher.next_writer();
    drop(wa);
    drop(wb);
    settle().await;
    assert!(ctx.reconnect().is_pending(a.id()));
    assert!(ctx.reconnect().is_pending(b.id()));
    assert_eq!(ctx.reconnect().pending(), 2);

    a.stop().await;
    tokio::time::advance(Duration::from_secs(4)).await;
    settle().await;
    assert_eq!(launcher.launches(), 3);
    assert!(b.is_running());
    b.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shared_address_older_connection_reconnects() {
    let (ctx, launcher) = context();
    let older = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), Arc::new(Frames::default()));
    let newer = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), Arc::new(Frames::default()));
    older.start().await.unwrap();
    newer.start().await.unwrap();
    assert_eq!(ctx.connections().get("10.0.0.5").map(|c| c.id()), Some(newer.id()));

    let w_older = launcher.next_writer();
    let _w_newer = launcher.next_writer();
    drop(w_older);
    settle().await;
    assert!(ctx.reconnect().is_pending(older.id()));
    assert!(!ctx.reconnect().is_pending(newer.id()));

    tokio::time::advance(Duration::from_secs(4)).await;
    settle().await;
    assert_eq!(launcher.launches(), 3);
    assert!(older.is_running());
    assert!(newer.is_running());

    older.stop().await;
    newer.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stopping_newer_keeps_older_retrying() {
    let (ctx, launcher) = context();
    let older = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), Arc::new(Frames::default()));
    let newer = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), Arc::new(Frames::default()));
    older.start().await.unwrap();
    newer.start().await.unwrap();

    let w_older = launcher.next_writer();
    let _w_newer = launcher.next_writer();
    drop(w_older);
    settle().await;

    newer.stop().await;
    assert!(ctx.reconnect().is_pending(older.id()));

    tokio::time::advance(Duration::from_secs(4)).await;
    settle().await;
    assert_eq!(launcher.launches(), 3);

    // second drop of the older session backs off to the next step
    drop(launcher.next_writer());
    settle().await;
    assert!(ctx.reconnect().is_pending(older.id()));
    tokio::time::advance(Duration::from_secs(7)).await;
    settle().await;
    assert_eq!(launcher.launches(), 4);
    assert!(older.is_running());

    older.stop().await;
}

#[tokio::test]
async fn handshake_violation_yields_no_media() {
    let (ctx, launcher) = context();
    let sink = Arc::new(Frames::default());
    let conn = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), sink.clone());
    conn.start().await.unwrap();

    let mut writer = launcher.next_writer();
    send(&mut writer, Message::metadata(&h264_1080p())).await;
    send(&mut writer, Message::video(&keyframe(1, 1_000))).await;
    settle().await;

    assert!(sink.video.lock().unwrap().is_empty());
    assert!(ctx.reconnect().is_pending(conn.id()));
    conn.stop().await;
}

#[tokio::test]
async fn sources_share_one_device_status() {
    let (ctx, _launcher) = context();
    let settings = SourceSettings {
        address: "10.0.0.5".into(),
        ..SourceSettings::default()
    };
    let a = StreamSource::new("a", ctx.clone(), Arc::new(Frames::default()));
    let b = StreamSource::new("b", ctx.clone(), Arc::new(Frames::default()));

    assert_eq!(a.update(settings.clone()).await, UpdateOutcome::Started);
    assert_eq!(b.update(settings).await, UpdateOutcome::Started);
    assert_eq!(ctx.statuses().len(), 1);
    assert_eq!(ctx.statuses().ref_count("10.0.0.5"), 2);

    a.shutdown().await;
    assert_eq!(ctx.statuses().ref_count("10.0.0.5"), 1);
    b.shutdown().await;
    assert!(ctx.statuses().find("10.0.0.5").is_none());

    ctx.shutdown().await;
}
