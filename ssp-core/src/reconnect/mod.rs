//! Reconnect coordinator.
//!
//! When a running connection drops, [`ReconnectCoordinator::schedule`]
//! waits out a backoff delay on a tracked task, checks that the
//! connection is still alive and still wants to run, then restarts it.
//! Each connection has at most one reconnect pending; different
//! connections never block each other.

mod backoff;

pub use backoff::BackoffPolicy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::task::TaskPool;

pub struct ReconnectCoordinator {
    policy: BackoffPolicy,
    pool: TaskPool<ConnectionId>,
    closed: AtomicBool,
}

impl ReconnectCoordinator {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            pool: TaskPool::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Schedule a restart of `conn` after the next backoff delay.
    ///
    /// Returns the delay, or `None` when the connection is no longer
    /// running, already has a reconnect pending, or the coordinator has
    /// shut down. Must be called from within a tokio runtime.
    pub fn schedule(&self, conn: &Connection) -> Option<Duration> {
        if !conn.is_running() || self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let id = conn.id();
        let address = conn.address();
        let mut delay = None;

        let spawned = self.pool.spawn(id, |cancel, slot| {
            let target = conn.downgrade();
            let address = address.to_string();
            let attempt = conn.next_attempt();
            let wait = self.policy.delay(attempt);
            delay = Some(wait);
            info!(%address, %id, attempt = attempt + 1, delay_secs = wait.as_secs(), "scheduling reconnect");

            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(%address, %id, "reconnect cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }

                let Some(conn) = target.upgrade() else {
                    debug!(%address, %id, "connection dropped before reconnect");
                    return;
                };
                if !conn.is_running() {
                    debug!(%address, %id, "connection stopped before reconnect");
                    return;
                }

                // The restarted client may disconnect before `restart`
                // returns; that disconnect needs a free slot. Shutdown
                // still waits for this task.
                slot.release();

                info!(%address, %id, "reconnecting");
                if let Err(e) = conn.restart().await {
                    warn!(%address, %id, "reconnect attempt failed: {e}");
                }
            }
        });

        if !spawned {
            debug!(%address, %id, "reconnect already pending");
            return None;
        }
        delay
    }

    /// Whether `id` has a reconnect waiting out its delay.
    pub fn is_pending(&self, id: ConnectionId) -> bool {
        self.pool.contains(&id)
    }

    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    /// Restarts past their delay that have not finished yet.
    pub fn restarting(&self) -> usize {
        self.pool.released()
    }

    /// Drop the pending reconnect for `id`, if any.
    pub fn cancel(&self, id: ConnectionId) -> bool {
        self.pool.cancel(&id)
    }

    /// Refuse new reconnects, cancel pending ones and wait for every
    /// reconnect task, including restarts in progress, to exit.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let pending = self.pool.len();
        let restarting = self.pool.released();
        self.pool.shutdown().await;
        info!(pending, restarting, "reconnect coordinator shut down");
    }
}

impl std::fmt::Debug for ReconnectCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectCoordinator")
            .field("policy", &self.policy)
            .field("pending", &self.pool.len())
            .field("restarting", &self.pool.released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::testing::{CollectSink, settle, test_context};

    fn secs(s: u64) -> Option<Duration> {
        Some(Duration::from_secs(s))
    }

    #[tokio::test(start_paused = true)]
    async fn one_reconnect_pending_per_connection() {
        let (ctx, _launcher) = test_context();
        let conn = Connection::new(
            &ctx,
            ConnectionConfig::new("10.0.0.5"),
            Arc::new(CollectSink::default()),
        );
        conn.start().await.unwrap();

        let reconnect = ctx.reconnect();
        assert_eq!(reconnect.schedule(&conn), secs(3));
        assert_eq!(reconnect.schedule(&conn), None);
        assert!(reconnect.is_pending(conn.id()));
        assert_eq!(reconnect.pending(), 1);
        assert_eq!(conn.reconnect_attempts(), 1);

        conn.stop().await;
        assert!(!reconnect.is_pending(conn.id()));
    }

    #[tokio::test]
    async fn stopped_connection_is_not_scheduled() {
        let (ctx, _launcher) = test_context();
        let conn = Connection::new(
            &ctx,
            ConnectionConfig::new("10.0.0.5"),
            Arc::new(CollectSink::default()),
        );
        assert_eq!(ctx.reconnect().schedule(&conn), None);
        assert_eq!(ctx.reconnect().pending(), 0);
        assert_eq!(conn.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_grow_then_hold_at_last_step() {
        let (ctx, _launcher) = test_context();
        let conn = Connection::new(
            &ctx,
            ConnectionConfig::new("10.0.0.5"),
            Arc::new(CollectSink::default()),
        );
        conn.start().await.unwrap();

        let reconnect = ctx.reconnect();
        for expected in [3, 6, 10, 15, 15, 15] {
            assert_eq!(reconnect.schedule(&conn), secs(expected));
            assert!(reconnect.cancel(conn.id()));
        }
        assert_eq!(conn.reconnect_attempts(), 6);
        assert_eq!(reconnect.policy().delay(u32::MAX), Duration::from_secs(15));
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_refuses_new_reconnects() {
        let (ctx, _launcher) = test_context();
        let conn = Connection::new(
            &ctx,
            ConnectionConfig::new("10.0.0.5"),
            Arc::new(CollectSink::default()),
        );
        conn.start().await.unwrap();
        assert!(ctx.reconnect().schedule(&conn).is_some());

        ctx.reconnect().shutdown().await;
        assert_eq!(ctx.reconnect().pending(), 0);
        assert_eq!(ctx.reconnect().schedule(&conn), None);
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_restart_in_progress() {
        let (ctx, launcher) = test_context();
        let conn = Connection::new(
            &ctx,
            ConnectionConfig::new("10.0.0.5"),
            Arc::new(CollectSink::default()),
        );
        conn.start().await.unwrap();
        launcher.delay_launches(Duration::from_secs(5));

        drop(launcher.writer(0));
        settle().await;
        assert!(ctx.reconnect().is_pending(conn.id()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(launcher.launches(), 2);
        assert_eq!(launcher.completed(), 1);
        assert!(!ctx.reconnect().is_pending(conn.id()));
        assert_eq!(ctx.reconnect().restarting(), 1);

        ctx.reconnect().shutdown().await;
        assert_eq!(launcher.completed(), 2);
        assert_eq!(ctx.reconnect().restarting(), 0);
        assert!(conn.is_running());
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn displaced_connection_still_reconnects() {
        let (ctx, launcher) = test_context();
        let sink = Arc::new(CollectSink::default());
        let older = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), sink.clone());
        let newer = Connection::new(&ctx, ConnectionConfig::new("10.0.0.5"), sink);
        older.start().await.unwrap();
        newer.start().await.unwrap();
        assert_eq!(ctx.connections().get("10.0.0.5").map(|c| c.id()), Some(newer.id()));

        drop(launcher.writer(0));
        settle().await;
        assert!(ctx.reconnect().is_pending(older.id()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(launcher.launches(), 3);
        assert!(older.is_running());

        older.stop().await;
        newer.stop().await;
    }
}
