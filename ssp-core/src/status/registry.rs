use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::DeviceStatus;
use crate::control::DeviceControlFactory;

struct Entry {
    status: Arc<DeviceStatus>,
    refs: usize,
    refresh: Option<JoinHandle<()>>,
}

/// Address → shared [`DeviceStatus`], reference counted by the sources
/// that use it.
pub struct DeviceStatusRegistry {
    factory: DeviceControlFactory,
    runtime: Handle,
    entries: Mutex<HashMap<String, Entry>>,
}

impl DeviceStatusRegistry {
    pub fn new(factory: DeviceControlFactory, runtime: Handle) -> Self {
        Self {
            factory,
            runtime,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a reference on the status for `address`, creating it on first
    /// use. A new status starts a background refresh.
    ///
    /// Returns `None` for an empty address or when no control client can
    /// be built for it.
    pub fn get_or_create(&self, address: &str) -> Option<Arc<DeviceStatus>> {
        if address.is_empty() {
            return None;
        }

        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(address) {
            entry.refs += 1;
            debug!(address, refs = entry.refs, "device status shared");
            return Some(entry.status.clone());
        }

        let control = match (self.factory)(address) {
            Ok(control) => control,
            Err(e) => {
                warn!(address, "no device control: {e}");
                return None;
            }
        };
        let status = Arc::new(DeviceStatus::new(address, control));
        let refresh = {
            let status = status.clone();
            self.runtime.spawn(async move {
                if let Err(e) = status.refresh_all().await {
                    warn!(address = %status.address(), "initial refresh failed: {e}");
                }
            })
        };
        info!(address, "device status created");
        entries.insert(
            address.to_string(),
            Entry {
                status: status.clone(),
                refs: 1,
                refresh: Some(refresh),
            },
        );
        Some(status)
    }

    /// Drop one reference. The entry goes away with its last reference.
    /// Returns `false` if `address` is unknown.
    pub fn release(&self, address: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(address) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(entry) = entries.remove(address) {
                if let Some(refresh) = entry.refresh {
                    refresh.abort();
                }
            }
            info!(address, "device status released");
        }
        true
    }

    /// Look up without taking a reference.
    pub fn find(&self, address: &str) -> Option<Arc<DeviceStatus>> {
        self.entries().get(address).map(|e| e.status.clone())
    }

    pub fn ref_count(&self, address: &str) -> usize {
        self.entries().get(address).map_or(0, |e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry regardless of reference counts.
    pub fn cleanup(&self) {
        let drained: Vec<_> = self.entries().drain().collect();
        for (_, entry) in drained {
            if let Some(refresh) = entry.refresh {
                refresh.abort();
            }
        }
    }
}

impl std::fmt::Debug for DeviceStatusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStatusRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
