use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::Connection;

/// Process-unique identity of one [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Address → live connection map.
///
/// Holds weak references only; callers upgrade and must handle a
/// connection that has gone away since it was registered.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, Weak<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Weak<Connection>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register `conn` under `address`, replacing whatever was there.
    pub fn register(&self, address: &str, conn: Weak<Connection>) {
        self.entries().insert(address.to_string(), conn);
    }

    /// Remove the entry for `address` if it still refers to `conn`.
    pub fn unregister(&self, address: &str, conn: &Weak<Connection>) -> bool {
        let mut entries = self.entries();
        match entries.get(address) {
            Some(current) if Weak::ptr_eq(current, conn) => {
                entries.remove(address);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, address: &str) -> Option<Weak<Connection>> {
        self.entries().get(address).cloned()
    }

    /// [`lookup`](Self::lookup) followed by an upgrade.
    pub fn get(&self, address: &str) -> Option<Arc<Connection>> {
        self.lookup(address).and_then(|w| w.upgrade())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.len())
            .finish()
    }
}
