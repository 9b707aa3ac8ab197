//! Ownership of a checked-out session for the length of one request.
//!
//! A [`SessionLease`] is the only way a request holds a session lock. It ends
//! with [`SessionLease::finish`]; if the request future is dropped first (a
//! request timeout, a client that went away) the lease finishes the session
//! on the runtime so the lock and connection are never stranded.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::session::{HolderId, Session};

pub struct SessionLease {
    session: Arc<Session>,
    holder: HolderId,
    done: bool,
}

impl SessionLease {
    /// Wrap a session whose lock `holder` already holds.
    pub fn new(session: Arc<Session>, holder: HolderId) -> Self {
        Self {
            session,
            holder,
            done: false,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Run `finished` for this request.
    ///
    /// The work runs as its own task, so it completes even if the caller is
    /// cancelled while waiting on it.
    pub async fn finish(mut self) {
        self.done = true;
        let session = self.session.clone();
        let holder = self.holder.clone();
        let task = tokio::spawn(async move { session.finished(&holder).await });
        if let Err(e) = task.await {
            tracing::error!(session = %self.session.token(), error = %e, "Finishing session failed");
        }
    }

    /// Release the lock without the end-of-request bookkeeping.
    pub(crate) fn abandon(mut self) {
        self.done = true;
        self.session.release(&self.holder);
    }
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session.token())
            .field("holder", &self.holder)
            .field("done", &self.done)
            .finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        tracing::warn!(
            session = %self.session.token(),
            holder = %self.holder,
            "Request dropped while holding the session, finishing it in the background"
        );
        let session = self.session.clone();
        let holder = self.holder.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { session.finished(&holder).await });
            }
            Err(_) => {
                session.release(&holder);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backend::types::Credentials;
    use crate::backend::MemoryBackend;
    use crate::pool::{ConnectionPool, PoolSettings};
    use crate::session::{Checkout, SessionStore, StoreSettings};

    fn store(backend: &MemoryBackend) -> SessionStore {
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(backend.clone()),
            PoolSettings {
                auto_user_token: Some("public".into()),
                ..PoolSettings::default()
            },
        ));
        SessionStore::new(pool, StoreSettings::default())
    }

    async fn settle(check: impl Fn() -> bool) {
        for _ in 0..20 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_dropped_lease_unlocks_and_disposes_anonymous_session() {
        let backend = MemoryBackend::new().with_public_token("public");
        let store = store(&backend);
        let holder = HolderId::new();
        let Checkout::Ready(lease) = store.checkout(None, &holder).await.unwrap() else {
            panic!("expected ready session");
        };
        let session = lease.session().clone();

        drop(lease);
        settle(|| !session.is_locked()).await;

        assert!(!session.is_locked());
        assert!(store.is_empty());
        assert_eq!(store.pool().stats().free, 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_keeps_logged_in_session_usable() {
        let backend = MemoryBackend::new()
            .with_public_token("public")
            .with_user("alice", "secret", "tok-alice");
        let store = store(&backend);
        let first = HolderId::new();
        let Checkout::Ready(lease) = store.checkout(None, &first).await.unwrap() else {
            panic!("expected ready session");
        };
        lease.authenticate(&Credentials::password("alice", "secret")).await;
        let token = lease.token().to_string();

        // A request cancelled mid-flight.
        let task = tokio::spawn(async move {
            let _lease = lease;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        let Checkout::Ready(next) = store.checkout(Some(&token), &HolderId::new()).await.unwrap() else {
            panic!("expected ready session");
        };
        assert!(next.logged_in());
        next.finish().await;
    }

    #[tokio::test]
    async fn test_finish_is_recorded_once() {
        let backend = MemoryBackend::new().with_public_token("public");
        let store = store(&backend);
        let session = store.retrieve_or_create(None);
        let holder = HolderId::new();
        assert!(session.try_acquire(&holder));

        SessionLease::new(session.clone(), holder).finish().await;
        assert!(!session.is_locked());
        assert_eq!(session.history().len(), 1);
    }
}
