//! One streaming session bound to a device address.
//!
//! A [`Connection`] owns the protocol client, the per-connection decode
//! pipeline and the reconnect attempt counter. Start, stop and restart
//! are serialized through a per-connection async lock; registry and
//! pipeline locks are never held across a callback or an await.

mod pipeline;
mod registry;

pub use registry::{ConnectionId, ConnectionRegistry};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::{ClientEvent, EventHandler, ProtocolClient};
use crate::context::SspContext;
use crate::error::SspError;
use crate::media::{MediaBackend, MediaSink};
use crate::reconnect::ReconnectCoordinator;
use crate::transport::Launcher;
use pipeline::MediaPipeline;

/// Where output timestamps come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Local monotonic clock at decode time.
    Internal,
    /// The camera's presentation timestamp, in nanoseconds.
    #[default]
    SspTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub address: String,
    /// Stream bitrate in bits per second.
    pub bitrate: u64,
    pub sync_mode: SyncMode,
    pub hw_accel: bool,
    pub wait_i_frame: bool,
}

impl ConnectionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            bitrate: 0,
            sync_mode: SyncMode::default(),
            hw_accel: false,
            wait_i_frame: true,
        }
    }

    /// Receive buffer hint handed to the protocol client.
    pub fn buffer_size(&self) -> u64 {
        self.bitrate / 8
    }
}

// ── Connection ───────────────────────────────────────────────────

pub struct Connection {
    id: ConnectionId,
    config: ConnectionConfig,
    registry: Arc<ConnectionRegistry>,
    reconnect: Arc<ReconnectCoordinator>,
    launcher: Arc<dyn Launcher>,
    pipeline: Arc<MediaPipeline>,
    running: AtomicBool,
    attempts: AtomicU32,
    client: Mutex<Option<ProtocolClient>>,
    this: Weak<Connection>,
}

/// Routes client events back into the owning connection without
/// keeping it alive.
struct ConnectionEvents(Weak<Connection>);

impl EventHandler for ConnectionEvents {
    fn on_event(&self, event: ClientEvent) {
        if let Some(conn) = self.0.upgrade() {
            conn.handle_event(event);
        }
    }
}

impl Connection {
    pub fn new(ctx: &SspContext, config: ConnectionConfig, sink: Arc<dyn MediaSink>) -> Arc<Self> {
        Self::with_parts(
            config,
            ctx.connections().clone(),
            ctx.reconnect().clone(),
            ctx.launcher().clone(),
            ctx.media().clone(),
            sink,
        )
    }

    pub fn with_parts(
        config: ConnectionConfig,
        registry: Arc<ConnectionRegistry>,
        reconnect: Arc<ReconnectCoordinator>,
        launcher: Arc<dyn Launcher>,
        media: Arc<dyn MediaBackend>,
        sink: Arc<dyn MediaSink>,
    ) -> Arc<Self> {
        let id = registry.allocate_id();
        let pipeline = MediaPipeline::new(&config, media, sink);
        Arc::new_cyclic(|this| Self {
            id,
            config,
            registry,
            reconnect,
            launcher,
            pipeline,
            running: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            client: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether the connection wants to be streaming (set by `start`,
    /// cleared by `stop`), independent of the helper's current state.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reconnects scheduled since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn downgrade(&self) -> Weak<Connection> {
        self.this.clone()
    }

    pub(crate) fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst)
    }

    /// Register under the device address and start streaming.
    ///
    /// Does nothing for an empty address. A launch failure is returned
    /// to the caller, but the connection stays registered and running
    /// and retries on the reconnect schedule until stopped.
    pub async fn start(&self) -> Result<(), SspError> {
        if self.config.address.is_empty() {
            debug!(id = %self.id, "not starting connection without an address");
            return Ok(());
        }

        let mut client = self.client.lock().await;
        if client.is_some() {
            return Err(SspError::InvalidTransition("connection already started"));
        }

        info!(
            address = %self.config.address,
            id = %self.id,
            bitrate = self.config.bitrate,
            "starting connection"
        );
        self.registry.register(&self.config.address, self.this.clone());
        self.running.store(true, Ordering::SeqCst);
        self.launch(&mut client).await
    }

    /// Stop streaming and unregister. Safe to call at any time.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.reconnect.cancel(self.id);
        self.registry.unregister(&self.config.address, &self.this);

        let mut client = self.client.lock().await;
        if let Some(client) = client.take() {
            client.stop().await;
        }
        self.pipeline.stop();
        info!(address = %self.config.address, id = %self.id, "connection stopped");
    }

    /// Tear down the current client and start a new one with the same
    /// configuration. Abandons quietly if the connection was stopped.
    pub(crate) async fn restart(&self) -> Result<(), SspError> {
        let mut client = self.client.lock().await;
        if !self.is_running() {
            debug!(address = %self.config.address, id = %self.id, "stopped before restart");
            return Ok(());
        }
        if let Some(old) = client.take() {
            old.stop().await;
        }
        self.pipeline.stop();
        self.launch(&mut client).await
    }

    async fn launch(&self, slot: &mut Option<ProtocolClient>) -> Result<(), SspError> {
        self.pipeline.start();
        let client = ProtocolClient::new(
            self.config.address.clone(),
            self.launcher.clone(),
            Arc::new(ConnectionEvents(self.this.clone())),
        )
        .with_buffer_size(self.config.buffer_size());

        let result = client.start().await;
        *slot = Some(client);
        if let Err(e) = &result {
            warn!(address = %self.config.address, id = %self.id, "connection start failed: {e}");
            self.on_disconnected();
        }
        result
    }

    fn on_disconnected(&self) {
        info!(address = %self.config.address, id = %self.id, "device disconnected");
        if !self.is_running() {
            return;
        }
        if let Some(delay) = self.reconnect.schedule(self) {
            debug!(address = %self.config.address, ?delay, "still running, reconnect scheduled");
        }
    }

    fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Metadata(meta) => self.pipeline.on_metadata(&meta),
            ClientEvent::Video(frame) => {
                if self.is_running() {
                    self.pipeline.enqueue_video(frame);
                }
            }
            ClientEvent::Audio(audio) => {
                if self.is_running() {
                    self.pipeline.on_audio(audio);
                }
            }
            ClientEvent::BufferFull => {
                warn!(address = %self.config.address, "helper receive buffer full");
            }
            ClientEvent::Connected => {
                let previous = self.attempts.swap(0, Ordering::SeqCst);
                info!(address = %self.config.address, previous, "connected, reconnect counter reset");
            }
            ClientEvent::Disconnected => self.on_disconnected(),
            ClientEvent::Exception { code, description } => {
                error!(address = %self.config.address, code, "helper exception: {description}");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.reconnect.cancel(self.id);
        self.registry.unregister(&self.config.address, &self.this);
        self.pipeline.stop();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
