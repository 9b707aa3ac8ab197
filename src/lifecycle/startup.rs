//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the backend connector, pool, session store and cache from config
//! - Warm the pool
//! - Bind the listener and run the server until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::backend::{connector_from_config, BackendError, Connector};
use crate::cache::{BackendResourceLoader, CacheLimits, ResourceCache};
use crate::config::AppConfig;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::pool::{ConnectionPool, PoolError, PoolSettings};
use crate::session::{SessionStore, StoreSettings};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Backend setup failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Pool warm-up failed: {0}")]
    Pool(#[from] PoolError),

    #[error("Listener failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire the subsystems together around `connector`.
pub fn build_state(config: AppConfig, connector: Arc<dyn Connector>) -> AppState {
    let pool = Arc::new(ConnectionPool::new(connector, PoolSettings::from_config(&config.backend)));
    let sessions = SessionStore::new(pool.clone(), StoreSettings::from_config(&config.session));
    let cache = ResourceCache::new(CacheLimits::from_config(&config.cache));
    let loader = Arc::new(BackendResourceLoader::new(pool.clone()));

    AppState {
        sessions,
        pool,
        cache,
        loader,
        config: Arc::new(config),
    }
}

/// Open `prefill_connections` connections ahead of traffic.
pub async fn warm_up(state: &AppState) -> Result<(), StartupError> {
    let count = state.config.backend.prefill_connections;
    if count > 0 {
        state.pool.prefill(count).await?;
    }
    Ok(())
}

/// Start everything and serve until `shutdown` fires.
pub async fn run(config: AppConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let connector = connector_from_config(&config.backend)?;
    tracing::info!(
        backend = ?config.backend.kind,
        max_connections = config.backend.max_connections,
        "Backend connector ready"
    );

    let state = build_state(config, connector);
    warm_up(&state).await?;

    let listener = TcpListener::bind(&state.config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(state).run(listener, shutdown).await?;
    Ok(())
}
