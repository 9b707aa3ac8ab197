//! Session registry.
//!
//! # Responsibilities
//! - Map session tokens to live sessions
//! - Create sessions on demand with fresh tokens
//! - Remove expired sessions in one pass
//! - Check a session out for a request (lock, connection, expiry)

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::schema::SessionConfig;
use crate::observability::metrics;
use crate::pool::{ConnectionPool, PoolResult};
use crate::session::{HolderId, Session, SessionLease, SessionSummary};

/// Resolved store settings.
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub idle_timeout: Duration,
    pub lock_poll_interval: Duration,
    pub lock_timeout: Duration,
}

impl StoreSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            lock_poll_interval: config.lock_poll_interval(),
            lock_timeout: config.lock_timeout(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Outcome of [`SessionStore::checkout`].
#[derive(Debug)]
pub enum Checkout {
    /// Locked by the caller, connected, expiry refreshed.
    Ready(SessionLease),
    /// Another request held the session for the whole wait.
    Busy { token: String },
}

/// The token map, shared with sessions so they can remove themselves.
pub(crate) struct StoreShared {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl StoreShared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().expect("session store mutex poisoned")
    }

    pub(crate) fn remove(&self, token: &str) -> Option<Arc<Session>> {
        let mut sessions = self.lock();
        let removed = sessions.remove(token);
        metrics::set_active_sessions(sessions.len());
        removed
    }
}

/// Registry of sessions by token. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    shared: Arc<StoreShared>,
    pool: Arc<ConnectionPool>,
    settings: StoreSettings,
}

impl SessionStore {
    pub fn new(pool: Arc<ConnectionPool>, settings: StoreSettings) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                sessions: Mutex::new(HashMap::new()),
            }),
            pool,
            settings,
        }
    }

    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Look up a session without creating one.
    pub fn get(&self, token: &str) -> Option<Arc<Session>> {
        self.shared.lock().get(token).cloned()
    }

    /// The session for `token`, or a new session under a fresh token.
    ///
    /// An unknown token is not reused; the caller learns the new token from
    /// the returned session.
    pub fn retrieve_or_create(&self, token: Option<&str>) -> Arc<Session> {
        let mut sessions = self.shared.lock();
        if let Some(session) = token.and_then(|t| sessions.get(t)) {
            tracing::trace!(session = %session.token(), "Retrieved existing session");
            return session.clone();
        }

        let token = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            token.clone(),
            self.pool.clone(),
            Arc::downgrade(&self.shared),
            self.settings.idle_timeout,
        ));
        sessions.insert(token, session.clone());
        metrics::set_active_sessions(sessions.len());
        tracing::debug!(session = %session.token(), active = sessions.len(), "Created new session");
        session
    }

    /// Remove `token` from the registry. Holders of the session may keep using it.
    pub fn remove(&self, token: &str) -> Option<Arc<Session>> {
        self.shared.remove(token)
    }

    /// Remove every session whose expiry is before `now`.
    pub fn sweep_expired(&self, now: Instant) -> Vec<Arc<Session>> {
        let mut sessions = self.shared.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.is_expired(now))
            .map(|(token, _)| token.clone())
            .collect();

        let removed: Vec<Arc<Session>> = expired.iter().filter_map(|t| sessions.remove(t)).collect();
        let remaining = sessions.len();
        drop(sessions);

        if !removed.is_empty() {
            metrics::set_active_sessions(remaining);
            metrics::record_swept(removed.len());
            tracing::info!(removed = removed.len(), remaining, "Removed expired sessions");
        }
        removed
    }

    /// Empty the registry, returning everything that was in it.
    pub fn remove_all(&self) -> Vec<Arc<Session>> {
        let removed: Vec<Arc<Session>> = self.shared.lock().drain().map(|(_, s)| s).collect();
        metrics::set_active_sessions(0);
        removed
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.shared.lock().values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Check a session out for one request.
    ///
    /// Retrieves or creates the session, waits for its lock, makes sure it
    /// holds a connection and refreshes its expiry. If no connection can be
    /// had the lock is released, the session is dropped from the registry
    /// and the error is returned.
    pub async fn checkout(&self, token: Option<&str>, holder: &HolderId) -> PoolResult<Checkout> {
        let session = self.retrieve_or_create(token);

        let acquired = session
            .acquire_with_wait(holder, self.settings.lock_poll_interval, self.settings.lock_timeout)
            .await;
        if !acquired {
            return Ok(Checkout::Busy {
                token: session.token().to_string(),
            });
        }

        let lease = SessionLease::new(session, holder.clone());
        if let Err(e) = lease.ensure_connection().await {
            self.remove(lease.token());
            lease.abandon();
            return Err(e);
        }

        lease.touch(self.settings.idle_timeout);
        Ok(Checkout::Ready(lease))
    }

    /// Hand every session's connection back and empty the registry.
    pub async fn shutdown(&self) {
        let sessions = self.remove_all();
        let count = sessions.len();
        for session in sessions {
            session.detach();
            session.force_release();
            session.retire().await;
        }
        tracing::info!(sessions = count, "Session store shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::pool::{PoolError, PoolSettings};

    fn store_with(backend: &MemoryBackend) -> SessionStore {
        let pool = Arc::new(ConnectionPool::new(Arc::new(backend.clone()), PoolSettings::default()));
        SessionStore::new(
            pool,
            StoreSettings {
                idle_timeout: Duration::from_secs(60),
                lock_poll_interval: Duration::from_millis(50),
                lock_timeout: Duration::from_millis(200),
            },
        )
    }

    #[test]
    fn test_retrieve_or_create() {
        let store = store_with(&MemoryBackend::new());
        let a = store.retrieve_or_create(None);
        let again = store.retrieve_or_create(Some(a.token()));
        assert!(Arc::ptr_eq(&a, &again));

        let fresh = store.retrieve_or_create(Some("unknown"));
        assert_ne!(fresh.token(), "unknown");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent_and_holders_keep_session() {
        let store = store_with(&MemoryBackend::new());
        let s = store.retrieve_or_create(None);
        assert!(store.remove(s.token()).is_some());
        assert!(store.remove(s.token()).is_none());
        assert!(s.try_acquire(&HolderId::new()));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = store_with(&MemoryBackend::new());
        let old = store.retrieve_or_create(None);
        let young = store.retrieve_or_create(None);
        young.touch(Duration::from_secs(600));

        let now = old.expires_at() + Duration::from_secs(1);
        let removed = store.sweep_expired(now);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].token(), old.token());
        assert!(store.get(young.token()).is_some());

        assert!(store.sweep_expired(now).is_empty());
    }

    #[tokio::test]
    async fn test_checkout_busy_after_timeout() {
        let store = store_with(&MemoryBackend::new());
        let s = store.retrieve_or_create(None);
        s.try_acquire(&HolderId::from("a"));

        let outcome = store.checkout(Some(s.token()), &HolderId::from("b")).await.unwrap();
        assert!(matches!(outcome, Checkout::Busy { ref token } if token == s.token()));
    }

    #[tokio::test]
    async fn test_checkout_ready_then_finished_disposes_anonymous() {
        let store = store_with(&MemoryBackend::new());
        let holder = HolderId::new();

        let Checkout::Ready(session) = store.checkout(None, &holder).await.unwrap() else {
            panic!("expected ready session");
        };
        assert!(session.has_connection().await);
        assert_eq!(store.len(), 1);

        session.finish().await;
        assert!(store.is_empty());
        assert_eq!(store.pool().stats().free, 1);
    }

    #[tokio::test]
    async fn test_checkout_without_backend_releases_lock() {
        let backend = MemoryBackend::new();
        backend.refuse_connections(true);
        let store = store_with(&backend);
        let session = store.retrieve_or_create(None);
        let token = session.token().to_string();

        let err = store.checkout(Some(&token), &HolderId::new()).await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionUnavailable(_)));
        assert!(!session.is_locked());
        assert!(store.get(&token).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_returns_connections() {
        let store = store_with(&MemoryBackend::new());
        let holder = HolderId::new();
        let Checkout::Ready(_session) = store.checkout(None, &holder).await.unwrap() else {
            panic!("expected ready session");
        };

        store.shutdown().await;
        assert!(store.is_empty());
        let stats = store.pool().stats();
        assert_eq!((stats.in_use, stats.free), (0, 1));
    }
}
