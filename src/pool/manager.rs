//! Connection pool management.
//!
//! # Responsibilities
//! - Hand out free connections, opening new ones on demand
//! - Reinitialize connections that come back carrying a user identity
//! - Discard dead connections
//! - Track in-use connections by id and borrower name

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::backend::Connector;
use crate::config::schema::BackendConfig;
use crate::observability::metrics;
use crate::pool::{Connection, PoolError, PoolResult};

/// Resolved pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Soft maximum; exceeding it only logs a warning.
    pub max_connections: usize,
    /// Per-call deadline. `None` means calls may run forever.
    pub call_timeout: Option<Duration>,
    pub server_prefix: Option<String>,
    pub auto_user_token: Option<String>,
}

impl PoolSettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            call_timeout: config.call_timeout(),
            server_prefix: config.server_prefix.clone(),
            auto_user_token: config.auto_user_token.clone(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

/// Snapshot of pool membership and lifetime counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub in_use: usize,
    pub max_connections: usize,
    pub created: u64,
    pub reused: u64,
    pub reinitialized: u64,
    pub discarded: u64,
    /// Borrower names of in-use connections, sorted.
    pub borrowers: Vec<String>,
}

#[derive(Default)]
struct PoolInner {
    free: Vec<Connection>,
    in_use: HashMap<u64, String>,
    next_id: u64,
    created: u64,
    reused: u64,
    reinitialized: u64,
    discarded: u64,
    closed: bool,
}

impl PoolInner {
    fn publish(&self) {
        metrics::set_pool_connections(self.free.len(), self.in_use.len());
    }
}

/// State shared between the pool and the connections it hands out.
pub(crate) struct PoolShared {
    inner: Mutex<PoolInner>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("pool mutex poisoned")
    }

    /// Remove a connection that was dropped by its borrower.
    pub(crate) fn forget(&self, id: u64) {
        let mut inner = self.lock();
        if inner.in_use.remove(&id).is_some() {
            inner.discarded += 1;
            inner.publish();
        }
    }
}

/// Pool of stateful backend connections.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner::default()),
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn auto_user_token(&self) -> Option<&str> {
        self.settings.auto_user_token.as_deref()
    }

    /// Take a connection for `name`, opening a new one if none is free.
    pub async fn acquire(&self, name: &str) -> PoolResult<Connection> {
        let (reused, dead) = {
            let mut inner = self.shared.lock();
            let mut dead = Vec::new();
            let mut reused = None;
            while let Some(conn) = inner.free.pop() {
                if conn.is_connected() {
                    inner.in_use.insert(conn.id(), name.to_string());
                    inner.reused += 1;
                    reused = Some(conn);
                    break;
                }
                inner.discarded += 1;
                dead.push(conn);
            }
            inner.publish();
            (reused, dead)
        };

        for mut conn in dead {
            tracing::debug!(conn = conn.id(), "Discarding dead free connection");
            metrics::record_pool_event("discarded");
            conn.close().await;
        }

        if let Some(mut conn) = reused {
            conn.set_name(name);
            conn.set_checked_out(true);
            metrics::record_pool_event("reused");
            tracing::debug!(conn = conn.id(), name = %name, "Reusing pooled connection");
            return Ok(conn);
        }

        let mut conn = self.open(name).await?;
        {
            let mut inner = self.shared.lock();
            inner.in_use.insert(conn.id(), name.to_string());
            inner.publish();
        }
        conn.set_checked_out(true);
        Ok(conn)
    }

    /// Open, bootstrap and authenticate a new connection.
    async fn open(&self, name: &str) -> PoolResult<Connection> {
        let id = {
            let mut inner = self.shared.lock();
            let total = inner.free.len() + inner.in_use.len();
            if total >= self.settings.max_connections {
                tracing::warn!(
                    total,
                    max_connections = self.settings.max_connections,
                    "Connection pool is over its soft maximum"
                );
            }
            inner.next_id += 1;
            inner.next_id
        };

        let handle = self.connector.connect().await.map_err(|e| {
            tracing::error!(name = %name, error = %e, "Failed to open backend connection");
            PoolError::ConnectionUnavailable(e)
        })?;

        let mut conn = Connection::new(
            id,
            name,
            handle,
            self.settings.call_timeout,
            Arc::downgrade(&self.shared),
        );

        if let Err(e) = conn
            .initialize(self.settings.server_prefix.as_deref(), self.auto_user_token())
            .await
        {
            tracing::error!(conn = id, name = %name, error = %e, "Failed to bootstrap backend connection");
            conn.close().await;
            return Err(PoolError::ConnectionUnavailable(e));
        }

        self.shared.lock().created += 1;
        metrics::record_pool_event("created");
        tracing::info!(conn = id, name = %name, "Opened backend connection");
        Ok(conn)
    }

    /// Return a connection to the pool.
    pub async fn release(&self, mut conn: Connection) {
        conn.set_checked_out(false);
        let closed = {
            let mut inner = self.shared.lock();
            inner.in_use.remove(&conn.id());
            inner.publish();
            inner.closed
        };

        if closed || !conn.is_connected() {
            tracing::debug!(conn = conn.id(), closed, "Discarding released connection");
            self.discard(conn).await;
            return;
        }

        if conn.needs_reinit() {
            let result = conn
                .initialize(self.settings.server_prefix.as_deref(), self.auto_user_token())
                .await;
            if let Err(e) = result {
                tracing::warn!(conn = conn.id(), error = %e, "Reinitialization failed, discarding connection");
                self.discard(conn).await;
                return;
            }
            self.shared.lock().reinitialized += 1;
            metrics::record_pool_event("reinitialized");
            tracing::debug!(conn = conn.id(), "Reinitialized connection");
        }

        conn.set_name("");
        let mut inner = self.shared.lock();
        inner.free.push(conn);
        inner.publish();
    }

    async fn discard(&self, mut conn: Connection) {
        conn.close().await;
        self.shared.lock().discarded += 1;
        metrics::record_pool_event("discarded");
    }

    /// Open `count` connections into the free list.
    pub async fn prefill(&self, count: usize) -> PoolResult<()> {
        for _ in 0..count {
            let conn = self.open("prefill").await?;
            let mut inner = self.shared.lock();
            inner.free.push(conn);
            inner.publish();
        }
        tracing::info!(count, "Prefilled connection pool");
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.lock();
        let mut borrowers: Vec<String> = inner.in_use.values().cloned().collect();
        borrowers.sort();
        PoolStats {
            free: inner.free.len(),
            in_use: inner.in_use.len(),
            max_connections: self.settings.max_connections,
            created: inner.created,
            reused: inner.reused,
            reinitialized: inner.reinitialized,
            discarded: inner.discarded,
            borrowers,
        }
    }

    /// Close every free connection. Connections released afterwards are
    /// closed instead of pooled.
    pub async fn shutdown(&self) {
        let free = {
            let mut inner = self.shared.lock();
            inner.closed = true;
            let free = std::mem::take(&mut inner.free);
            inner.publish();
            free
        };

        let count = free.len();
        for mut conn in free {
            conn.close().await;
        }
        tracing::info!(closed = count, "Connection pool shut down");
    }
}
