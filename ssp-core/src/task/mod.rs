//! Tracked background tasks keyed by id.
//!
//! At most one task is pending per key. Each task gets a cancellation
//! token and can give up its key through a [`TaskSlot`] while it keeps
//! running. Released tasks no longer block the key but are still
//! cancelled and awaited by [`TaskPool::shutdown`].

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct PooledTask {
    serial: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct PoolState<K> {
    next_serial: u64,
    tasks: HashMap<K, PooledTask>,
    /// Tasks that released their key, by serial.
    released: HashMap<u64, PooledTask>,
}

/// A set of keyed, cancellable tasks.
pub struct TaskPool<K> {
    state: Arc<Mutex<PoolState<K>>>,
}

/// Handle a running task uses to give up its slot early.
pub struct TaskSlot<K> {
    key: K,
    serial: u64,
    state: Arc<Mutex<PoolState<K>>>,
}

fn lock<K>(state: &Mutex<PoolState<K>>) -> MutexGuard<'_, PoolState<K>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K> TaskSlot<K>
where
    K: Eq + Hash,
{
    /// Free the key so a new task may be spawned under it. The running
    /// task stays tracked until it finishes. Does nothing if the slot was
    /// already cancelled.
    pub fn release(&self) {
        let mut state = lock(&self.state);
        if let Some(task) = take_owned(&mut state, &self.key, self.serial) {
            state.released.insert(self.serial, task);
        }
    }

    fn finish(&self) {
        let mut state = lock(&self.state);
        if take_owned(&mut state, &self.key, self.serial).is_none() {
            state.released.remove(&self.serial);
        }
    }
}

/// Remove the pending task under `key` if it is still the one with `serial`.
fn take_owned<K: Eq + Hash>(state: &mut PoolState<K>, key: &K, serial: u64) -> Option<PooledTask> {
    if state.tasks.get(key).is_some_and(|t| t.serial == serial) {
        state.tasks.remove(key)
    } else {
        None
    }
}

impl<K> Default for TaskPool<K> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                next_serial: 0,
                tasks: HashMap::new(),
                released: HashMap::new(),
            })),
        }
    }
}

impl<K> TaskPool<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `f` under `key` unless a task with that key is still in flight.
    ///
    /// Returns `false` (and does not run `f`) when the key is taken. The
    /// slot is released automatically when the task finishes.
    pub fn spawn<F, Fut>(&self, key: K, f: F) -> bool
    where
        F: FnOnce(CancellationToken, TaskSlot<K>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.tasks.contains_key(&key) {
            return false;
        }

        state.next_serial += 1;
        let serial = state.next_serial;
        let cancel = CancellationToken::new();
        let slot = TaskSlot {
            key: key.clone(),
            serial,
            state: self.state.clone(),
        };
        let finished = TaskSlot {
            key: key.clone(),
            serial,
            state: self.state.clone(),
        };
        let fut = f(cancel.clone(), slot);
        let handle = tokio::spawn(async move {
            fut.await;
            finished.finish();
        });

        state.tasks.insert(
            key,
            PooledTask {
                serial,
                cancel,
                handle,
            },
        );
        true
    }

    /// Whether a task that has not released its key exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        lock(&self.state).tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel the task under `key` and forget it. Returns whether one existed.
    pub fn cancel(&self, key: &K) -> bool {
        let task = lock(&self.state).tasks.remove(key);
        match task {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Tasks that released their key and are still running.
    pub fn released(&self) -> usize {
        lock(&self.state).released.len()
    }

    /// Cancel every task, released ones included, and wait for all of
    /// them to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<PooledTask> = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let released = std::mem::take(&mut state.released);
            state
                .tasks
                .drain()
                .map(|(_, t)| t)
                .chain(released.into_values())
                .collect()
        };
        for task in &tasks {
            task.cancel.cancel();
        }
        let results = join_all(tasks.into_iter().map(|t| t.handle)).await;
        for e in results.into_iter().filter_map(Result::err) {
            if e.is_panic() {
                warn!("pooled task panicked: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn one_task_per_key() {
        let pool = TaskPool::new();
        let started = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let started = started.clone();
            pool.spawn(1u64, move |cancel, _slot| async move {
                started.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
            });
        }
        assert!(pool.spawn(2u64, |cancel, _| async move { cancel.cancelled().await }));

        tokio::task::yield_now().await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 2);

        pool.shutdown().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn finished_tasks_free_their_key() {
        let pool = TaskPool::new();
        assert!(pool.spawn(7u64, |_, _| async {}));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!pool.contains(&7));
        assert!(pool.spawn(7u64, |_, _| async {}));
    }

    #[tokio::test]
    async fn released_slot_allows_respawn_while_running() {
        let pool = Arc::new(TaskPool::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        pool.spawn(1u64, move |_, slot| async move {
            slot.release();
            let _ = rx.await;
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!pool.contains(&1));
        assert_eq!(pool.released(), 1);
        assert!(pool.spawn(1u64, |cancel, _| async move { cancel.cancelled().await }));

        // the first task finishing must not evict the second
        tx.send(()).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(pool.contains(&1));
        assert_eq!(pool.released(), 0);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_released_tasks() {
        let pool = TaskPool::new();
        let done = Arc::new(AtomicUsize::new(0));
        {
            let done = done.clone();
            pool.spawn(1u64, move |_, slot| async move {
                slot.release();
                tokio::time::sleep(Duration::from_secs(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(pool.is_empty());
        assert_eq!(pool.released(), 1);

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pool.released(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_sleeping_task() {
        let pool = TaskPool::new();
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            pool.spawn(3u64, move |cancel, _| async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(3)) => {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
        assert!(pool.cancel(&3));
        assert!(!pool.cancel(&3));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
