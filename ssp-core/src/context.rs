//! Shared process-wide state.
//!
//! Everything that several sources see at once lives in one
//! [`SspContext`]: the connection registry, the reconnect coordinator,
//! device statuses and the set of addresses a source currently claims.
//! The host builds one context at startup and passes it around.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tracing::info;

use crate::connection::ConnectionRegistry;
use crate::control::{DeviceControl, DeviceControlFactory};
use crate::error::SspError;
use crate::media::{MediaBackend, PassthroughBackend};
use crate::reconnect::{BackoffPolicy, ReconnectCoordinator};
use crate::status::DeviceStatusRegistry;
use crate::transport::Launcher;

/// Addresses at least one source is currently interested in, counted
/// per source.
#[derive(Debug, Default)]
pub struct ActiveAddresses {
    inner: Mutex<HashMap<String, usize>>,
}

impl ActiveAddresses {
    fn inner(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `true` if no other source held `address`.
    pub fn insert(&self, address: &str) -> bool {
        let mut inner = self.inner();
        let count = inner.entry(address.to_string()).or_default();
        *count += 1;
        *count == 1
    }

    /// Returns `true` once the last interested source lets go.
    pub fn remove(&self, address: &str) -> bool {
        let mut inner = self.inner();
        let Some(count) = inner.get_mut(address) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            inner.remove(address);
            return true;
        }
        false
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SspContext {
    connections: Arc<ConnectionRegistry>,
    reconnect: Arc<ReconnectCoordinator>,
    statuses: Arc<DeviceStatusRegistry>,
    active: Arc<ActiveAddresses>,
    launcher: Arc<dyn Launcher>,
    media: Arc<dyn MediaBackend>,
}

impl SspContext {
    pub fn builder(launcher: Arc<dyn Launcher>) -> SspContextBuilder {
        SspContextBuilder {
            launcher,
            media: None,
            control: None,
            backoff: BackoffPolicy::default(),
            runtime: None,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn reconnect(&self) -> &Arc<ReconnectCoordinator> {
        &self.reconnect
    }

    pub fn statuses(&self) -> &Arc<DeviceStatusRegistry> {
        &self.statuses
    }

    pub fn active(&self) -> &Arc<ActiveAddresses> {
        &self.active
    }

    pub fn launcher(&self) -> &Arc<dyn Launcher> {
        &self.launcher
    }

    pub fn media(&self) -> &Arc<dyn MediaBackend> {
        &self.media
    }

    /// Cancel pending reconnects, then drop every device status.
    ///
    /// Sources should be shut down first so nothing schedules new work.
    pub async fn shutdown(&self) {
        self.reconnect.shutdown().await;
        self.statuses.cleanup();
        info!(connections = self.connections.len(), "context shut down");
    }
}

impl std::fmt::Debug for SspContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SspContext")
            .field("connections", &self.connections)
            .field("reconnect", &self.reconnect)
            .field("statuses", &self.statuses)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

pub struct SspContextBuilder {
    launcher: Arc<dyn Launcher>,
    media: Option<Arc<dyn MediaBackend>>,
    control: Option<DeviceControlFactory>,
    backoff: BackoffPolicy,
    runtime: Option<Handle>,
}

impl SspContextBuilder {
    /// Decoder and frame buffer provider. Defaults to [`PassthroughBackend`].
    pub fn media(mut self, media: Arc<dyn MediaBackend>) -> Self {
        self.media = Some(media);
        self
    }

    /// Without a factory every device status lookup fails.
    pub fn device_control(mut self, factory: DeviceControlFactory) -> Self {
        self.control = Some(factory);
        self
    }

    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Runtime for device refresh tasks. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Arc<SspContext>, SspError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| SspError::Other(format!("no tokio runtime: {e}")))?,
        };
        let control: DeviceControlFactory = match self.control {
            Some(factory) => factory,
            None => Arc::new(|address: &str| -> Result<Box<dyn DeviceControl>, SspError> {
                Err(SspError::DeviceControl(format!(
                    "no device control configured for {address}"
                )))
            }),
        };

        Ok(Arc::new(SspContext {
            connections: Arc::new(ConnectionRegistry::new()),
            reconnect: Arc::new(ReconnectCoordinator::new(self.backoff)),
            statuses: Arc::new(DeviceStatusRegistry::new(control, runtime)),
            active: Arc::new(ActiveAddresses::default()),
            launcher: self.launcher,
            media: self
                .media
                .unwrap_or_else(|| Arc::new(PassthroughBackend) as Arc<dyn MediaBackend>),
        }))
    }
}
