//! Host service core logic.
//!
//! Builds the shared ingest context from the configuration, runs one
//! [`StreamSource`] per configured camera and tears everything down in
//! order on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use ssp_core::control::{ConfigKey, ConfigValue, ControlResult, StreamAttr, StreamInfo};
use ssp_core::media::{AudioOutput, VideoOutput};
use ssp_core::{
    DeviceControl, DeviceControlFactory, MediaSink, PassthroughBackend, SspContext, SspError,
    StreamSource, UpdateOutcome,
};

use crate::config::HostConfig;

/// Interval between periodic stream statistics lines.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

// ── StatsSink ────────────────────────────────────────────────────

/// Counters for one source's decoded output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub video_frames: u64,
    pub keyframes: u64,
    pub video_bytes: u64,
    pub audio_frames: u64,
    pub audio_bytes: u64,
}

/// Media sink that counts frames and bytes instead of rendering them.
#[derive(Debug)]
pub struct StatsSink {
    name: String,
    video_frames: AtomicU64,
    keyframes: AtomicU64,
    video_bytes: AtomicU64,
    audio_frames: AtomicU64,
    audio_bytes: AtomicU64,
}

impl StatsSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            video_frames: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            video_bytes: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            audio_bytes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            video_frames: self.video_frames.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            video_bytes: self.video_bytes.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            audio_bytes: self.audio_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            source = %self.name,
            video_frames = s.video_frames,
            keyframes = s.keyframes,
            video_bytes = s.video_bytes,
            audio_frames = s.audio_frames,
            audio_bytes = s.audio_bytes,
            "stream stats"
        );
    }
}

impl MediaSink for StatsSink {
    fn on_video(&self, frame: VideoOutput) {
        self.video_frames.fetch_add(1, Ordering::Relaxed);
        if frame.keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
        self.video_bytes
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);
    }

    fn on_audio(&self, frame: AudioOutput) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
        self.audio_bytes
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);
    }
}

// ── UnmanagedControl ─────────────────────────────────────────────

/// Device control for hosts without a camera HTTP client. Every request
/// fails, so sources only stream with `no_check` set.
#[derive(Debug)]
pub struct UnmanagedControl {
    address: String,
}

impl UnmanagedControl {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }

    pub fn factory() -> DeviceControlFactory {
        Arc::new(|address: &str| -> Result<Box<dyn DeviceControl>, SspError> {
            Ok(Box::new(UnmanagedControl::new(address)))
        })
    }

    fn unavailable<T>(&self, what: &str) -> ControlResult<T> {
        Err(SspError::DeviceControl(format!(
            "{what}: device control not available for {}",
            self.address
        )))
    }
}

#[async_trait]
impl DeviceControl for UnmanagedControl {
    async fn get_info(&self) -> ControlResult<String> {
        self.unavailable("get info")
    }

    async fn get_config(&self, key: ConfigKey) -> ControlResult<ConfigValue> {
        self.unavailable(&format!("get {key}"))
    }

    async fn set_config(&self, key: ConfigKey, _value: &str) -> ControlResult<()> {
        self.unavailable(&format!("set {key}"))
    }

    async fn get_stream_info(&self, _index: &str) -> ControlResult<StreamInfo> {
        self.unavailable("get stream info")
    }

    async fn set_send_stream(&self, _index: &str) -> ControlResult<()> {
        self.unavailable("set send stream")
    }

    async fn set_stream_attr(&self, _attr: &StreamAttr) -> ControlResult<()> {
        self.unavailable("set stream attr")
    }

    async fn set_stream_bitrate(&self, _index: &str, _bitrate: u64) -> ControlResult<()> {
        self.unavailable("set stream bitrate")
    }
}

// ── HostService ──────────────────────────────────────────────────

struct RunningSource {
    source: StreamSource,
    stats: Arc<StatsSink>,
}

/// The top-level host service.
pub struct HostService {
    config: HostConfig,
    ctx: Arc<SspContext>,
    sources: Vec<RunningSource>,
}

impl HostService {
    /// Build the service with the helper process launcher from `config`.
    pub fn new(config: HostConfig) -> Result<Self, SspError> {
        let ctx = SspContext::builder(Arc::new(config.to_launcher()))
            .media(Arc::new(PassthroughBackend))
            .device_control(UnmanagedControl::factory())
            .backoff(config.to_backoff())
            .build()?;
        Ok(Self::with_context(config, ctx))
    }

    pub fn with_context(config: HostConfig, ctx: Arc<SspContext>) -> Self {
        Self {
            config,
            ctx,
            sources: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<SspContext> {
        &self.ctx
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Create and start every configured source.
    pub async fn start(&mut self) {
        for cfg in &self.config.sources {
            let stats = Arc::new(StatsSink::new(&cfg.name));
            let source = StreamSource::new(&cfg.name, self.ctx.clone(), stats.clone());
            match source.update(cfg.to_settings()).await {
                UpdateOutcome::Started => info!(source = %cfg.name, address = %cfg.address, "source started"),
                UpdateOutcome::Unchanged => {}
                UpdateOutcome::Skipped { reason } => {
                    warn!(source = %cfg.name, address = %cfg.address, "source not started: {reason}");
                }
            }
            self.sources.push(RunningSource { source, stats });
        }
        info!(sources = self.sources.len(), "host started");
    }

    /// Start, log statistics periodically until `shutdown` resolves,
    /// then stop.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start().await;

        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    for running in &self.sources {
                        running.stats.log_summary();
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop every source, then cancel pending reconnects and drop the
    /// device statuses.
    pub async fn shutdown(&mut self) {
        for running in self.sources.drain(..) {
            running.source.shutdown().await;
            running.stats.log_summary();
        }
        self.ctx.shutdown().await;
        info!("host stopped");
    }
}

// ── Tests ────────────────────────────────────────────────────────
