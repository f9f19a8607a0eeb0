//! Keyed session store
//!
//! One [`Session`] per thread, held behind an async mutex so at most one
//! turn runs per thread while distinct threads proceed in parallel.
//! Sessions idle longer than the configured TTL are evicted.

use crate::config::SupervisorConfig;
use crate::state::ConversationState;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tabedit_table::{SnapshotStore, Table};
use tokio::sync::Mutex;

/// Shared handle to one thread's session
pub type SessionHandle = Arc<Mutex<Session>>;

/// A thread's conversation state and table history
#[derive(Debug, Clone)]
pub struct Session {
    pub state: ConversationState,
    pub snapshots: SnapshotStore,
}

impl Session {
    /// Session whose history starts with `table` at the state's version
    #[must_use]
    pub fn new(state: ConversationState, table: Table, snapshot_limit: usize) -> Self {
        let snapshots = SnapshotStore::new(table, state.table_version, snapshot_limit);
        Self { state, snapshots }
    }

    /// Committed table
    #[inline]
    #[must_use]
    pub fn table(&self) -> &Table {
        &self.snapshots.current().table
    }
}

/// Live sessions by thread id
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Cache<String, SessionHandle>,
}

impl SessionStore {
    /// Store holding at most `max_sessions`, each dropped after `ttl` idle
    #[must_use]
    pub fn new(max_sessions: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_sessions)
                .time_to_idle(ttl)
                .build(),
        }
    }

    /// Store sized from configuration
    #[must_use]
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.max_sessions, config.session_ttl())
    }

    /// Session for `thread_id`, if live
    pub async fn get(&self, thread_id: &str) -> Option<SessionHandle> {
        self.inner.get(thread_id).await
    }

    /// Session for `thread_id`, creating it with `init` if absent
    pub async fn get_or_insert_with(
        &self,
        thread_id: &str,
        init: impl FnOnce() -> Session,
    ) -> SessionHandle {
        self.inner
            .get_with(thread_id.to_string(), async move { Arc::new(Mutex::new(init())) })
            .await
    }

    /// Drop a session, returning it if it was live
    pub async fn remove(&self, thread_id: &str) -> Option<SessionHandle> {
        self.inner.remove(thread_id).await
    }

    /// Approximate number of live sessions
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Check if no sessions are live
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply pending evictions and update counts
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        let table = Table::new(["A"]).unwrap();
        Session::new(ConversationState::new(id, &table), table, 4)
    }

    #[tokio::test]
    async fn get_or_insert_reuses_session() {
        let store = SessionStore::new(10, Duration::from_secs(60));
        let first = store.get_or_insert_with("t1", || session("t1")).await;
        first.lock().await.state.attempt_count = 2;
        let again = store.get_or_insert_with("t1", || session("t1")).await;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.lock().await.state.attempt_count, 2);
    }

    #[tokio::test]
    async fn remove_drops_session() {
        let store = SessionStore::new(10, Duration::from_secs(60));
        store.get_or_insert_with("t1", || session("t1")).await;
        assert!(store.remove("t1").await.is_some());
        assert!(store.get("t1").await.is_none());
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let store = SessionStore::new(10, Duration::from_millis(50));
        store.get_or_insert_with("t1", || session("t1")).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        store.run_pending_tasks().await;
        assert!(store.get("t1").await.is_none());
    }
}
