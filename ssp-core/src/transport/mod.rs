//! Helper-process transport.
//!
//! A [`Transport`] owns the byte source the receive loop reads frames
//! from and, when one exists, the helper child process behind it.
//! [`Launcher`] is the seam between the protocol client and the OS:
//! [`ProcessLauncher`] spawns the real helper, tests plug in in-memory
//! launchers.

mod process;

pub use process::{DEFAULT_CONNECTOR_PORT, ProcessLauncher};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SspError;

/// Boxed frame source handed to the receive loop.
pub type TransportReader = Box<dyn AsyncRead + Send + Unpin>;

/// Launches one transport per protocol-client start.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a transport talking to the device at `address`.
    async fn launch(&self, address: &str) -> Result<Transport, SspError>;
}

// ── Transport ────────────────────────────────────────────────────

/// A running transport: the frame reader plus the helper process, if any.
pub struct Transport {
    reader: Option<TransportReader>,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Wrap a byte source that has no process behind it.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Some(Box::new(reader)),
            child: None,
            stderr_task: None,
        }
    }

    pub(crate) fn from_parts(
        reader: TransportReader,
        child: Child,
        stderr_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            reader: Some(reader),
            child: Some(child),
            stderr_task,
        }
    }

    /// Hand the frame reader to the receive loop. Returns `None` once taken.
    pub fn take_reader(&mut self) -> Option<TransportReader> {
        self.reader.take()
    }

    /// OS pid of the helper, if this transport owns a live process.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Kill and reap the helper. Safe to call more than once.
    pub async fn terminate(&mut self) {
        self.reader = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("helper already gone: {e}");
            }
            match child.wait().await {
                Ok(status) => debug!("helper exited: {status}"),
                Err(e) => warn!("failed to reap helper: {e}"),
            }
        }
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("reader", &self.reader.is_some())
            .field("pid", &self.pid())
            .finish()
    }
}
