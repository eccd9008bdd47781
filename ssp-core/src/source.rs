//! Logical source: one configured camera feed.
//!
//! A [`StreamSource`] ties the pieces together for a single feed. On
//! every settings update it decides whether streaming must restart,
//! moves its device-status reference and active-address claim when the
//! address changes, configures the camera and starts a [`Connection`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionConfig, SyncMode};
use crate::context::SspContext;
use crate::error::SspError;
use crate::media::MediaSink;
use crate::status::{DeviceStatus, StreamRequest};

/// Camera encoder stream to pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encoder {
    #[default]
    H264,
    H265,
}

impl Encoder {
    /// The camera serves H.265 on stream 0 and H.264 on stream 1.
    pub fn stream_index(self) -> u32 {
        match self {
            Self::H265 => 0,
            Self::H264 => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub address: String,
    /// bit/s.
    pub bitrate: u64,
    pub sync_mode: SyncMode,
    pub hw_accel: bool,
    pub wait_i_frame: bool,
    pub encoder: Encoder,
    /// `"<width>*<height>"`.
    pub resolution: String,
    pub framerate: String,
    pub low_noise: bool,
    /// Drive the camera's tally LED from source visibility.
    pub tally: bool,
    /// Start streaming even if the camera could not be configured.
    pub no_check: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            bitrate: 20_000_000,
            sync_mode: SyncMode::default(),
            hw_accel: false,
            wait_i_frame: true,
            encoder: Encoder::default(),
            resolution: "1920*1080".into(),
            framerate: "30".into(),
            low_noise: false,
            tally: false,
            no_check: false,
        }
    }
}

impl SourceSettings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            address: self.address.clone(),
            bitrate: self.bitrate,
            sync_mode: self.sync_mode,
            hw_accel: self.hw_accel,
            wait_i_frame: self.wait_i_frame,
        }
    }

    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            stream_index: self.encoder.stream_index(),
            resolution: self.resolution.clone(),
            low_noise: self.low_noise,
            framerate: self.framerate.clone(),
            bitrate: self.bitrate,
        }
    }

    /// Settings that need a new connection when they change.
    fn restart_needed(&self, other: &Self) -> bool {
        self.address != other.address
            || self.hw_accel != other.hw_accel
            || self.sync_mode != other.sync_mode
            || self.bitrate != other.bitrate
            || self.wait_i_frame != other.wait_i_frame
    }

    /// Whether the camera's cached current stream differs from what these
    /// settings ask for. Unknown is treated as equal.
    fn stream_differs(&self, status: Option<&DeviceStatus>) -> bool {
        let Some(info) = status.and_then(|s| s.current_stream()) else {
            return false;
        };
        let Some((width, height)) = self
            .resolution
            .split_once('*')
            .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)))
        else {
            return true;
        };
        let fps = self.framerate.trim().parse::<f64>().unwrap_or(0.0);
        info.width != width
            || info.height != height
            || info.stream_number() != self.encoder.stream_index()
            || info.fps != (fps + 0.1) as u32
    }
}

/// What [`StreamSource::update`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing relevant changed; the running connection was kept.
    Unchanged,
    Started,
    /// Streaming was not started.
    Skipped { reason: String },
}

#[derive(Default)]
struct SourceState {
    settings: Option<SourceSettings>,
    /// Address claimed in the active set.
    address: Option<String>,
    status: Option<Arc<DeviceStatus>>,
    connection: Option<Arc<Connection>>,
}

pub struct StreamSource {
    name: String,
    ctx: Arc<SspContext>,
    sink: Arc<dyn MediaSink>,
    state: Mutex<SourceState>,
}

impl StreamSource {
    pub fn new(name: impl Into<String>, ctx: Arc<SspContext>, sink: Arc<dyn MediaSink>) -> Self {
        Self {
            name: name.into(),
            ctx,
            sink,
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn connection(&self) -> Option<Arc<Connection>> {
        self.state.lock().await.connection.clone()
    }

    pub async fn status(&self) -> Option<Arc<DeviceStatus>> {
        self.state.lock().await.status.clone()
    }

    /// Apply new settings.
    pub async fn update(&self, settings: SourceSettings) -> UpdateOutcome {
        let mut state = self.state.lock().await;

        let restart = match &state.settings {
            Some(prev) => prev.restart_needed(&settings),
            None => true,
        } || settings.stream_differs(state.status.as_deref());
        if !restart && state.connection.is_some() {
            debug!(source = %self.name, "settings unchanged, keeping connection");
            state.settings = Some(settings);
            return UpdateOutcome::Unchanged;
        }

        if let Some(conn) = state.connection.take() {
            conn.stop().await;
        }
        self.claim(&mut state, &settings.address);
        state.settings = Some(settings.clone());

        if settings.address.is_empty() {
            return UpdateOutcome::Skipped {
                reason: "no address".into(),
            };
        }

        match self.configure(state.status.as_deref(), &settings).await {
            Ok(reason) => {
                info!(source = %self.name, address = %settings.address, %reason, "stream configured");
            }
            Err(e) if settings.no_check => {
                warn!(source = %self.name, address = %settings.address, "stream setup failed, starting anyway: {e}");
            }
            Err(e) => {
                warn!(source = %self.name, address = %settings.address, "stream setup failed: {e}");
                return UpdateOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        }

        if !self.ctx.active().contains(&settings.address) {
            return UpdateOutcome::Skipped {
                reason: "address no longer active".into(),
            };
        }

        let conn = Connection::new(&self.ctx, settings.connection_config(), self.sink.clone());
        if let Err(e) = conn.start().await {
            warn!(source = %self.name, address = %settings.address, "first connect failed, retrying: {e}");
        }
        state.connection = Some(conn);

        if let Some(status) = &state.status {
            if let Err(e) = status.refresh_current_stream().await {
                debug!(source = %self.name, "could not refresh current stream: {e}");
            }
        }
        UpdateOutcome::Started
    }

    async fn configure(
        &self,
        status: Option<&DeviceStatus>,
        settings: &SourceSettings,
    ) -> Result<String, SspError> {
        let Some(status) = status else {
            return Err(SspError::DeviceControl(format!(
                "no device control for {}",
                settings.address
            )));
        };
        if status.model().is_empty() {
            if let Err(e) = status.refresh_all().await {
                debug!(source = %self.name, "refresh before setup failed: {e}");
            }
        }
        status.set_stream(&settings.stream_request()).await
    }

    /// Move the active-address claim and device-status reference to
    /// `address`.
    fn claim(&self, state: &mut SourceState, address: &str) {
        if state.address.as_deref() != Some(address) {
            if let Some(old) = state.address.take() {
                self.ctx.active().remove(&old);
                if state.status.take().is_some() {
                    self.ctx.statuses().release(&old);
                }
            }
            if address.is_empty() {
                return;
            }
            self.ctx.active().insert(address);
            state.address = Some(address.to_string());
        }
        if state.status.is_none() {
            state.status = self.ctx.statuses().get_or_create(address);
        }
    }

    /// Source visibility changed. Drives the tally LED when enabled.
    pub async fn set_shown(&self, shown: bool) {
        let state = self.state.lock().await;
        let tally = state.settings.as_ref().is_some_and(|s| s.tally);
        if let (true, Some(status)) = (tally, &state.status) {
            status.set_led(shown).await;
        }
    }

    /// Stop streaming and give up the address.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(conn) = state.connection.take() {
            conn.stop().await;
        }
        if let Some(address) = state.address.take() {
            self.ctx.active().remove(&address);
            if state.status.take().is_some() {
                self.ctx.statuses().release(&address);
            }
        }
        info!(source = %self.name, "source shut down");
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
