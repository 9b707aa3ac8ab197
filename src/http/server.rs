//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request ID, timeout, body limit, tracing, metrics)
//! - Merge the admin API when enabled
//! - Run the session sweeper alongside the listener
//! - Drain sessions and the pool on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::cache::{ResourceCache, ResourceLoader};
use crate::config::AppConfig;
use crate::http::handlers::{login, logout, serve_resource};
use crate::http::request::{assign_lock_holder, propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::pool::ConnectionPool;
use crate::session::{SessionStore, SessionSweeper};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub pool: Arc<ConnectionPool>,
    pub cache: ResourceCache,
    pub loader: Arc<dyn ResourceLoader>,
    pub config: Arc<AppConfig>,
}

/// HTTP front end of the session server.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();

        let mut router = Router::new()
            .route("/login", post(login))
            .route("/logout", get(logout))
            .route("/", any(serve_resource))
            .route("/{*path}", any(serve_resource))
            .with_state(state.clone());

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state));
        } else {
            tracing::debug!("Admin API disabled");
        }

        router.layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                .layer(middleware::from_fn(track_requests))
                .layer(middleware::from_fn(assign_lock_holder))
                .layer(DefaultBodyLimit::max(config.listener.max_body_size)),
        )
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let session_config = &self.state.config.session;
        let sweeper = if session_config.sweep_enabled {
            let sweeper = SessionSweeper::new(self.state.sessions.clone(), session_config.sweep_interval());
            Some(tokio::spawn(sweeper.run(shutdown.subscribe())))
        } else {
            tracing::warn!("Session sweeper disabled; idle sessions are never removed");
            None
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        if let Some(task) = sweeper {
            // The listener can stop on its own; make sure the sweeper does too.
            shutdown.trigger();
            let _ = task.await;
        }

        self.state.sessions.shutdown().await;
        self.state.pool.shutdown().await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Count and time every request.
async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
