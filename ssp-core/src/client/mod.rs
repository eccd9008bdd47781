//! Protocol client: one helper session per `start()`.
//!
//! [`ProtocolClient::start`] launches a transport through the injected
//! [`Launcher`] and spawns a receive task that decodes frames and hands
//! them to the client's [`EventHandler`]. [`ProtocolClient::stop`]
//! cancels that task, joins it and terminates the helper.

mod event;
mod receive;

pub use event::{ClientCallbacks, ClientEvent, EventHandler};
pub use receive::{LoopExit, run_receive_loop};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SspError;
use crate::state::ClientPhase;
use crate::transport::{Launcher, Transport};

#[derive(Default)]
struct ClientState {
    phase: ClientPhase,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<LoopExit>>,
    transport: Option<Transport>,
}

pub struct ProtocolClient {
    address: String,
    buffer_size: u64,
    launcher: Arc<dyn Launcher>,
    handler: Arc<dyn EventHandler>,
    state: Mutex<ClientState>,
}

impl ProtocolClient {
    pub fn new(
        address: impl Into<String>,
        launcher: Arc<dyn Launcher>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            address: address.into(),
            buffer_size: 0,
            launcher,
            handler,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Receive buffer size hint in bytes, usually the stream bitrate / 8.
    pub fn with_buffer_size(mut self, bytes: u64) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    pub async fn phase(&self) -> ClientPhase {
        self.state.lock().await.phase.clone()
    }

    /// Whether the receive task is still alive.
    pub async fn is_receiving(&self) -> bool {
        let state = self.state.lock().await;
        state.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Launch the helper and start receiving.
    ///
    /// Fails with [`SspError::InvalidTransition`] when already started and
    /// with [`SspError::TransportLaunch`] when the helper cannot be
    /// spawned; in the latter case no receive task exists afterwards.
    pub async fn start(&self) -> Result<(), SspError> {
        let mut state = self.state.lock().await;
        state.phase.begin_start()?;

        let mut transport = match self.launcher.launch(&self.address).await {
            Ok(t) => t,
            Err(e) => {
                state.phase.launch_failed()?;
                warn!(address = %self.address, "helper launch failed: {e}");
                return Err(e);
            }
        };

        let Some(mut reader) = transport.take_reader() else {
            transport.terminate().await;
            state.phase.launch_failed()?;
            return Err(SspError::Other("transport has no reader".into()));
        };

        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let worker = {
            let running = running.clone();
            let cancel = cancel.clone();
            let handler = self.handler.clone();
            let address = self.address.clone();
            tokio::spawn(async move {
                let exit =
                    run_receive_loop(&mut reader, handler.as_ref(), &running, &cancel, &address)
                        .await;
                if let LoopExit::Failed(e) = &exit {
                    if running.load(Ordering::SeqCst) {
                        debug!(%address, "receive loop failed, reporting disconnect: {e}");
                        handler.on_event(ClientEvent::Disconnected);
                    }
                }
                exit
            })
        };

        info!(
            address = %self.address,
            pid = ?transport.pid(),
            buffer_size = self.buffer_size,
            "protocol client started"
        );
        state.running = running;
        state.cancel = cancel;
        state.worker = Some(worker);
        state.transport = Some(transport);
        state.phase.launched()
    }

    /// Stop receiving and terminate the helper. A no-op when not started.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.phase.is_inactive() || state.phase.begin_stop().is_err() {
            return;
        }

        state.running.store(false, Ordering::SeqCst);
        state.cancel.cancel();

        if let Some(worker) = state.worker.take() {
            match worker.await {
                Ok(exit) => debug!(address = %self.address, ?exit, "receive task joined"),
                Err(e) => warn!(address = %self.address, "receive task panicked: {e}"),
            }
        }
        if let Some(mut transport) = state.transport.take() {
            transport.terminate().await;
        }

        let _ = state.phase.finish_stop();
        info!(address = %self.address, "protocol client stopped");
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.running.store(false, Ordering::SeqCst);
        state.cancel.cancel();
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
