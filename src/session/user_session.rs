//! A single user session.
//!
//! # Responsibilities
//! - Exclusive, reentrant lock keyed by holder id
//! - Idle expiry clock
//! - At most one borrowed backend connection
//! - Login state, page history and current resource
//!
//! # Lock States
//! ```text
//! Free ──try_acquire(h)──▶ Locked(h) ──release(h)──▶ Free
//!                           │   ▲
//!                           └───┘ try_acquire(h): reentrant no-op
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::backend::procedure::{AUTHENTICATE_USER, LOGOUT};
use crate::backend::types::{first_row, row_str, BackendError, BackendResult, Credentials, ResultSets};
use crate::backend::{ParamValue, ProcedureCall};
use crate::cache::Resource;
use crate::observability::metrics;
use crate::pool::{Connection, ConnectionPool, PoolResult};
use crate::session::store::StoreShared;

/// Identifies the party holding a session lock, typically one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HolderId(String);

impl HolderId {
    /// A fresh random holder id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for HolderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HolderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One completed page visit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub page: Option<String>,
    pub completed_at: SystemTime,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A real user is now logged in.
    Success { username: String },
    /// Only the configured anonymous identity was authenticated.
    Public,
    Rejected { reason: String },
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success { .. })
    }
}

/// Diagnostics view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub token: String,
    pub holder: Option<HolderId>,
    pub logged_in: bool,
    pub auto_logged_in: bool,
    pub username: Option<String>,
    pub request_count: u64,
    pub history_len: usize,
    /// `None` while a request is using the connection slot.
    pub has_connection: Option<bool>,
    pub expires_in_secs: u64,
    pub created_at: SystemTime,
}

struct SessionState {
    holder: Option<HolderId>,
    lock_acquired_at: Option<Instant>,
    expires_at: Instant,
    logged_in: bool,
    auto_logged_in: bool,
    username: Option<String>,
    user_token: Option<String>,
    request_count: u64,
    history: Vec<HistoryEntry>,
    bookmark: Option<String>,
    next_page: Option<String>,
    current_resource: Option<Arc<Resource>>,
    /// Removed from the store while possibly still in use.
    detached: bool,
}

/// Per-user state with an embedded reentrant lock.
pub struct Session {
    token: String,
    state: Mutex<SessionState>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    released: Notify,
    pool: Arc<ConnectionPool>,
    store: Weak<StoreShared>,
    created_at: SystemTime,
}

impl Session {
    pub(crate) fn new(
        token: String,
        pool: Arc<ConnectionPool>,
        store: Weak<StoreShared>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            token,
            state: Mutex::new(SessionState {
                holder: None,
                lock_acquired_at: None,
                expires_at: Instant::now() + idle_timeout,
                logged_in: false,
                auto_logged_in: false,
                username: None,
                user_token: None,
                request_count: 0,
                history: Vec::new(),
                bookmark: None,
                next_page: None,
                current_resource: None,
                detached: false,
            }),
            connection: tokio::sync::Mutex::new(None),
            released: Notify::new(),
            pool,
            store,
            created_at: SystemTime::now(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session mutex poisoned")
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    // --- Locking ---

    /// Take the lock without waiting. Reentrant for the current holder.
    pub fn try_acquire(&self, holder: &HolderId) -> bool {
        let mut state = self.state();
        if let Some(current) = &state.holder {
            return current == holder;
        }
        state.holder = Some(holder.clone());
        state.lock_acquired_at = Some(Instant::now());
        state.request_count += 1;
        tracing::debug!(session = %self.token, holder = %holder, "Session LOCK obtained");
        true
    }

    /// Take the lock, waiting up to `timeout`.
    ///
    /// Between attempts the task sleeps until a release notification or
    /// `poll_interval`, whichever comes first. Waiters are not queued; the
    /// first one to observe a free lock wins.
    pub async fn acquire_with_wait(&self, holder: &HolderId, poll_interval: Duration, timeout: Duration) -> bool {
        let started = Instant::now();
        let give_up_at = started + timeout;
        let mut announced = false;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before trying so a release in between is not missed.
            notified.as_mut().enable();

            if self.try_acquire(holder) {
                metrics::record_lock_wait(started.elapsed().as_secs_f64(), true);
                return true;
            }

            let now = Instant::now();
            if now >= give_up_at {
                metrics::record_lock_wait(started.elapsed().as_secs_f64(), false);
                tracing::warn!(
                    session = %self.token,
                    holder = %holder,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Gave up waiting for busy session"
                );
                return false;
            }

            if !announced {
                announced = true;
                tracing::debug!(session = %self.token, holder = %holder, "Waiting for busy session");
            }

            let wake_at = (now + poll_interval).min(give_up_at);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Release the lock held by `holder`.
    ///
    /// A release by anyone but the holder is refused and logged.
    pub fn release(&self, holder: &HolderId) -> bool {
        let state = self.state();
        self.release_locked(state, holder)
    }

    fn release_locked(&self, mut state: MutexGuard<'_, SessionState>, holder: &HolderId) -> bool {
        match &state.holder {
            Some(current) if current == holder => {}
            Some(current) => {
                tracing::warn!(
                    session = %self.token,
                    requestor = %holder,
                    locked_by = %current,
                    "Session release called by a party that does not hold the lock"
                );
                return false;
            }
            None => {
                tracing::debug!(session = %self.token, requestor = %holder, "Release of an unlocked session");
                return false;
            }
        }
        state.holder = None;
        let held_for = state.lock_acquired_at.take().map(|at| at.elapsed());
        drop(state);

        tracing::debug!(
            session = %self.token,
            holder = %holder,
            lock_ms = held_for.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0),
            "Session UNLOCK"
        );
        self.released.notify_waiters();
        true
    }

    /// Clear the lock whoever holds it. Returns the previous holder.
    pub fn force_release(&self) -> Option<HolderId> {
        let previous = {
            let mut state = self.state();
            state.lock_acquired_at = None;
            state.holder.take()
        };
        if let Some(previous) = &previous {
            tracing::warn!(session = %self.token, locked_by = %previous, "Session lock forcibly released");
            self.released.notify_waiters();
        }
        previous
    }

    pub fn is_locked(&self) -> bool {
        self.state().holder.is_some()
    }

    pub fn holder(&self) -> Option<HolderId> {
        self.state().holder.clone()
    }

    // --- Expiry ---

    /// Push expiry out to `idle_timeout` from now.
    pub fn touch(&self, idle_timeout: Duration) {
        self.state().expires_at = Instant::now() + idle_timeout;
    }

    pub fn expires_at(&self) -> Instant {
        self.state().expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.state().expires_at < now
    }

    // --- Accessors ---

    pub fn logged_in(&self) -> bool {
        self.state().logged_in
    }

    pub fn auto_logged_in(&self) -> bool {
        self.state().auto_logged_in
    }

    pub fn username(&self) -> Option<String> {
        self.state().username.clone()
    }

    pub fn user_token(&self) -> Option<String> {
        self.state().user_token.clone()
    }

    pub fn request_count(&self) -> u64 {
        self.state().request_count
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state().history.clone()
    }

    pub fn bookmark(&self) -> Option<String> {
        self.state().bookmark.clone()
    }

    pub fn set_bookmark(&self, bookmark: Option<String>) {
        self.state().bookmark = bookmark;
    }

    pub fn next_page(&self) -> Option<String> {
        self.state().next_page.clone()
    }

    pub fn set_next_page(&self, page: Option<String>) {
        self.state().next_page = page;
    }

    pub fn current_resource(&self) -> Option<Arc<Resource>> {
        self.state().current_resource.clone()
    }

    /// Record `resource` as the page this session is on.
    ///
    /// Only templates qualify, and once a page is current a script resource
    /// never replaces it.
    pub fn set_current_resource(&self, resource: Arc<Resource>) -> bool {
        if !resource.meta.render_template {
            return false;
        }
        let mut state = self.state();
        if resource.is_script() && state.current_resource.is_some() {
            return false;
        }
        state.current_resource = Some(resource);
        true
    }

    /// The connection slot. Held across backend calls.
    pub async fn connection(&self) -> tokio::sync::MutexGuard<'_, Option<Connection>> {
        self.connection.lock().await
    }

    pub async fn has_connection(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    // --- Connection ---

    /// Make sure the session holds a live connection.
    ///
    /// A dead connection is returned to the pool (which discards it) and the
    /// login is lost with it.
    pub async fn ensure_connection(&self) -> PoolResult<()> {
        let mut slot = self.connection.lock().await;

        if let Some(conn) = slot.as_ref() {
            if conn.is_connected() {
                return Ok(());
            }
            if let Some(dead) = slot.take() {
                tracing::warn!(session = %self.token, conn = dead.id(), "Session connection is dead");
                self.pool.release(dead).await;
            }
            self.clear_login();
        }

        let conn = self.pool.acquire(&self.token).await?;
        tracing::debug!(session = %self.token, conn = conn.id(), "Session took a pooled connection");
        *slot = Some(conn);
        Ok(())
    }

    /// Run a procedure on the session's connection.
    ///
    /// A handle that turns out to be dead is dropped from the session.
    pub async fn call(&self, call: &ProcedureCall) -> BackendResult<ResultSets> {
        let mut slot = self.connection.lock().await;
        let Some(conn) = slot.as_mut() else {
            return Err(BackendError::Disconnected);
        };

        let result = conn.call(call).await;
        let lost = match &result {
            Err(e) => e.is_disconnect() || !conn.is_connected(),
            Ok(_) => false,
        };

        if lost {
            if let Some(dead) = slot.take() {
                tracing::warn!(session = %self.token, conn = dead.id(), "Discarding disconnected session connection");
                self.pool.release(dead).await;
            }
            self.clear_login();
        }
        result
    }

    fn clear_login(&self) {
        let mut state = self.state();
        state.logged_in = false;
        state.auto_logged_in = false;
        state.username = None;
        state.user_token = None;
    }

    /// Authenticate on the session's connection.
    ///
    /// A user token equal to the pool's auto token only counts as the
    /// anonymous identity.
    pub async fn authenticate(&self, credentials: &Credentials) -> AuthOutcome {
        self.clear_login();
        tracing::debug!(session = %self.token, ?credentials, "Attempting authentication");

        let call = match AUTHENTICATE_USER.bind([
            ("username", ParamValue::from(credentials.username.as_deref())),
            ("password", ParamValue::from(credentials.password.as_deref())),
            ("user_token", ParamValue::from(credentials.user_token.as_deref())),
            ("session_token", ParamValue::from(self.token.as_str())),
        ]) {
            Ok(call) => call,
            Err(e) => {
                return AuthOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };

        if let Err(e) = self.ensure_connection().await {
            tracing::warn!(session = %self.token, error = %e, "No backend connection for authentication");
            return AuthOutcome::Rejected {
                reason: "Could not reach the backend".to_string(),
            };
        }

        let sets = match self.call(&call).await {
            Ok(sets) => sets,
            Err(e) => {
                tracing::info!(session = %self.token, error = %e, "Authentication failed");
                let reason = if e.is_disconnect() {
                    "Could not reach the backend"
                } else {
                    "Invalid username or password."
                };
                return AuthOutcome::Rejected {
                    reason: reason.to_string(),
                };
            }
        };

        let Some(row) = first_row(&sets).filter(|row| row_str(row, "session_guid").is_some()) else {
            tracing::info!(session = %self.token, "Authentication rejected");
            return AuthOutcome::Rejected {
                reason: "Invalid username or password.".to_string(),
            };
        };

        let user_token = row_str(row, "user_token").map(str::to_string);
        let auto_token = self.pool.auto_user_token();
        if auto_token.is_some() && user_token.as_deref() == auto_token {
            self.state().auto_logged_in = true;
            tracing::debug!(session = %self.token, "Authenticated as the anonymous identity");
            return AuthOutcome::Public;
        }

        let username = row_str(row, "username")
            .map(str::to_string)
            .or_else(|| credentials.username.clone())
            .unwrap_or_default();

        {
            let mut state = self.state();
            state.logged_in = true;
            state.username = Some(username.clone());
            state.user_token = user_token;
        }
        if let Some(conn) = self.connection.lock().await.as_mut() {
            conn.mark_user_authenticated();
        }

        tracing::info!(session = %self.token, username = %username, "User logged in");
        AuthOutcome::Success { username }
    }

    /// Log out and hand the connection back to the pool.
    pub async fn logout(&self) {
        let conn = self.connection.lock().await.take();
        self.clear_login();

        if let Some(mut conn) = conn {
            if conn.is_connected() {
                match LOGOUT.bind([("session_token", ParamValue::from(self.token.as_str()))]) {
                    Ok(call) => {
                        if let Err(e) = conn.call(&call).await {
                            tracing::debug!(session = %self.token, error = %e, "Backend logout failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Invalid logout call"),
                }
            }
            self.pool.release(conn).await;
        }
        tracing::info!(session = %self.token, "Logged out");
    }

    /// End a request held by `holder`.
    ///
    /// Records history, returns the connection if nobody is logged in or the
    /// session has left the store, removes the session from the store once
    /// it has no connection, and releases the lock.
    pub async fn finished(&self, holder: &HolderId) {
        let mut keep_connection = {
            let mut state = self.state();
            if state.holder.as_ref() != Some(holder) {
                tracing::debug!(session = %self.token, requestor = %holder, "finished() without holding the lock");
                return;
            }

            let page = state.next_page.clone();
            let repeat = state.history.last().is_some_and(|last| last.page == page);
            if !repeat {
                state.history.push(HistoryEntry {
                    page,
                    completed_at: SystemTime::now(),
                });
            }
            tracing::debug!(session = %self.token, requests = state.request_count, "Finished with this request");
            state.logged_in && !state.detached
        };

        loop {
            let has_connection = {
                let mut slot = self.connection.lock().await;
                if !keep_connection {
                    if let Some(conn) = slot.take() {
                        self.pool.release(conn).await;
                    }
                }
                slot.is_some()
            };

            if has_connection {
                tracing::debug!(session = %self.token, "Session kept until it expires");
            } else if let Some(store) = self.store.upgrade() {
                tracing::debug!(session = %self.token, "Destroying session");
                store.remove(&self.token);
            }

            // A sweep may detach the session until the moment it unlocks.
            let swept_while_busy = {
                let state = self.state();
                if has_connection && state.detached {
                    true
                } else {
                    self.release_locked(state, holder);
                    false
                }
            };
            if !swept_while_busy {
                return;
            }
            tracing::debug!(session = %self.token, "Session swept while busy, returning its connection");
            self.clear_login();
            keep_connection = false;
        }
    }

    /// Mark the session as removed from the store.
    ///
    /// Returns whether a request still holds the lock; that request's
    /// `finished` then hands the connection back.
    pub(crate) fn detach(&self) -> bool {
        let mut state = self.state();
        state.detached = true;
        state.holder.is_some()
    }

    /// Hand the connection of a session that left the store back to the pool.
    pub async fn retire(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            self.pool.release(conn).await;
        }
        self.clear_login();
    }

    pub fn summary(&self) -> SessionSummary {
        let has_connection = self.connection.try_lock().ok().map(|slot| slot.is_some());
        let state = self.state();
        SessionSummary {
            token: self.token.clone(),
            holder: state.holder.clone(),
            logged_in: state.logged_in,
            auto_logged_in: state.auto_logged_in,
            username: state.username.clone(),
            request_count: state.request_count,
            history_len: state.history.len(),
            has_connection,
            expires_in_secs: state.expires_at.saturating_duration_since(Instant::now()).as_secs(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("holder", &self.holder())
            .field("logged_in", &self.logged_in())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryResource};
    use crate::cache::ResourceMeta;
    use crate::pool::PoolSettings;

    fn pool(backend: &MemoryBackend) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            Arc::new(backend.clone()),
            PoolSettings {
                auto_user_token: Some("public".into()),
                ..PoolSettings::default()
            },
        ))
    }

    fn session(backend: &MemoryBackend) -> Session {
        Session::new("tok".into(), pool(backend), Weak::new(), Duration::from_secs(60))
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_public_token("public")
            .with_user("alice", "secret", "tok-alice")
            .with_resource(MemoryResource::text("a", "a"))
    }

    fn template(code: &str) -> Arc<Resource> {
        Arc::new(Resource::new(
            code,
            "x",
            ResourceMeta {
                render_template: true,
                ..ResourceMeta::default()
            },
        ))
    }

    #[test]
    fn test_lock_is_reentrant_and_exclusive() {
        let s = session(&MemoryBackend::new());
        let a = HolderId::from("a");
        let b = HolderId::from("b");

        assert!(s.try_acquire(&a));
        assert!(s.try_acquire(&a));
        assert!(!s.try_acquire(&b));
        assert_eq!(s.request_count(), 1);

        assert!(!s.release(&b));
        assert_eq!(s.holder(), Some(a.clone()));
        assert!(s.release(&a));
        assert!(s.try_acquire(&b));
        assert_eq!(s.request_count(), 2);
    }

    #[test]
    fn test_force_release() {
        let s = session(&MemoryBackend::new());
        let a = HolderId::from("a");
        assert_eq!(s.force_release(), None);
        s.try_acquire(&a);
        assert_eq!(s.force_release(), Some(a));
        assert!(!s.is_locked());
    }

    #[test]
    fn test_expiry_is_strictly_after() {
        let s = session(&MemoryBackend::new());
        let at = s.expires_at();
        assert!(!s.is_expired(at));
        assert!(s.is_expired(at + Duration::from_millis(1)));
    }

    #[test]
    fn test_current_resource_rules() {
        let s = session(&MemoryBackend::new());
        let plain = Arc::new(Resource::new("style.css", "x", ResourceMeta::default()));
        assert!(!s.set_current_resource(plain));
        assert!(s.current_resource().is_none());

        // A script template may become current when nothing is.
        assert!(s.set_current_resource(template("first.js")));
        assert!(s.set_current_resource(template("page")));
        assert!(!s.set_current_resource(template("widget.vue")));
        assert_eq!(s.current_resource().unwrap().code, "page");
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let s = Arc::new(session(&MemoryBackend::new()));
        let a = HolderId::from("a");
        let b = HolderId::from("b");
        assert!(s.try_acquire(&a));

        let waiter = {
            let s = s.clone();
            let b = b.clone();
            tokio::spawn(async move {
                s.acquire_with_wait(&b, Duration::from_secs(10), Duration::from_secs(30)).await
            })
        };
        tokio::task::yield_now().await;
        s.release(&a);

        // Woken by the notification, well before the 10s poll.
        let acquired = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert!(acquired);
        assert_eq!(s.holder(), Some(b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_at_deadline() {
        let s = session(&MemoryBackend::new());
        let a = HolderId::from("a");
        let b = HolderId::from("b");
        s.try_acquire(&a);

        let started = Instant::now();
        let acquired = s
            .acquire_with_wait(&b, Duration::from_millis(500), Duration::from_secs(2))
            .await;
        assert!(!acquired);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2), "{waited:?}");
        assert!(waited < Duration::from_millis(2100), "{waited:?}");
    }

    #[tokio::test]
    async fn test_login_keeps_connection_through_finished() {
        let backend = backend();
        let s = session(&backend);
        let h = HolderId::new();
        s.try_acquire(&h);

        let outcome = s.authenticate(&Credentials::password("alice", "secret")).await;
        assert_eq!(outcome, AuthOutcome::Success { username: "alice".into() });
        assert!(s.logged_in());
        assert_eq!(s.user_token().as_deref(), Some("tok-alice"));

        s.set_next_page(Some("home".into()));
        s.finished(&h).await;
        assert!(s.has_connection().await);
        assert!(!s.is_locked());
        assert_eq!(s.history().len(), 1);
    }

    #[tokio::test]
    async fn test_anonymous_finished_returns_connection() {
        let backend = backend();
        let s = session(&backend);
        let pool = s.pool.clone();
        let h = HolderId::new();
        s.try_acquire(&h);
        s.ensure_connection().await.unwrap();
        assert_eq!(pool.stats().in_use, 1);

        s.finished(&h).await;
        assert!(!s.has_connection().await);
        assert_eq!(pool.stats().free, 1);
        assert!(!s.is_locked());
    }

    #[tokio::test]
    async fn test_history_skips_repeated_page() {
        let s = session(&MemoryBackend::new());
        let h = HolderId::new();
        for page in ["a", "a", "b"] {
            s.try_acquire(&h);
            s.set_next_page(Some(page.into()));
            s.finished(&h).await;
        }
        let pages: Vec<_> = s.history().into_iter().map(|e| e.page).collect();
        assert_eq!(pages, vec![Some("a".into()), Some("b".into())]);
    }

    #[tokio::test]
    async fn test_finished_by_non_holder_is_ignored() {
        let s = session(&MemoryBackend::new());
        let a = HolderId::from("a");
        s.try_acquire(&a);
        s.finished(&HolderId::from("b")).await;
        assert!(s.is_locked());
        assert!(s.history().is_empty());
    }

    #[tokio::test]
    async fn test_auto_token_is_not_a_login() {
        let backend = backend();
        let s = session(&backend);
        let outcome = s.authenticate(&Credentials::token("public")).await;
        assert_eq!(outcome, AuthOutcome::Public);
        assert!(!s.logged_in());
        assert!(s.auto_logged_in());
    }

    #[tokio::test]
    async fn test_bad_password_is_rejected() {
        let backend = backend();
        let s = session(&backend);
        let outcome = s.authenticate(&Credentials::password("alice", "nope")).await;
        assert!(matches!(outcome, AuthOutcome::Rejected { .. }));
        assert!(!s.logged_in());
    }

    #[tokio::test]
    async fn test_dead_connection_is_dropped_and_login_cleared() {
        let backend = backend();
        let s = session(&backend);
        s.authenticate(&Credentials::password("alice", "secret")).await;
        assert!(s.logged_in());

        backend.drop_all_handles();
        let call = crate::backend::procedure::GET_RESOURCE
            .bind([("resource_code", ParamValue::from("a"))])
            .unwrap();
        assert!(s.call(&call).await.is_err());
        assert!(!s.has_connection().await);
        assert!(!s.logged_in());

        // A fresh connection is taken on demand.
        s.ensure_connection().await.unwrap();
        assert!(s.call(&call).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_returns_connection() {
        let backend = backend();
        let s = session(&backend);
        s.authenticate(&Credentials::password("alice", "secret")).await;
        s.logout().await;

        assert!(!s.logged_in());
        assert!(s.username().is_none());
        assert!(!s.has_connection().await);
        assert_eq!(backend.call_count("logout"), 1);
        assert_eq!(s.pool.stats().free, 1);
    }

    #[tokio::test]
    async fn test_detached_login_returns_connection_on_finish() {
        let backend = backend();
        let s = session(&backend);
        let h = HolderId::new();
        s.try_acquire(&h);
        s.authenticate(&Credentials::password("alice", "secret")).await;

        assert!(s.detach());
        s.finished(&h).await;

        assert!(!s.has_connection().await);
        assert!(!s.is_locked());
        assert!(!s.logged_in());
        let stats = s.pool.stats();
        assert_eq!((stats.free, stats.in_use), (1, 0));
        assert_eq!(backend.live_handles(), 1);
    }

    #[tokio::test]
    async fn test_summary_connection_unknown_while_slot_in_use() {
        let s = session(&backend());
        s.ensure_connection().await.unwrap();
        assert_eq!(s.summary().has_connection, Some(true));

        let slot = s.connection().await;
        assert_eq!(s.summary().has_connection, None);
        drop(slot);
        s.retire().await;
        assert_eq!(s.summary().has_connection, Some(false));
    }
}
