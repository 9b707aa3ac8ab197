//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use session_server::backend::{MemoryBackend, MemoryResource};
use session_server::config::AppConfig;
use session_server::http::{AppState, HttpServer};
use session_server::lifecycle::{startup, Shutdown};

pub const ADMIN_KEY: &str = "test-admin-key";

/// Config tuned for fast tests: short lock waits, admin on, no exporter.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.session.lock_poll_interval_ms = 50;
    config.session.lock_timeout_secs = 1;
    config.timeouts.request_secs = 10;
    config.observability.metrics_enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// A backend with a few pages and one user (`alice` / `secret`).
pub fn demo_backend() -> MemoryBackend {
    let backend = MemoryBackend::new()
        .with_user("alice", "secret", "tok-alice")
        .with_resource(MemoryResource::text("home.html", "<h1>home</h1>"))
        .with_resource(MemoryResource::text("index.html", "<h1>index</h1>").template())
        .with_resource(MemoryResource::text("login.html", "<form>login</form>"))
        .with_resource(MemoryResource::text("private.html", "<h1>members only</h1>").requiring_auth())
        .with_resource(MemoryResource::text("app.js", "console.log(1);").content_type("application/javascript"));
    backend.set_default_resource("home.html");
    backend
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub backend: MemoryBackend,
    pub state: AppState,
    pub shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.task.await;
    }
}

/// Start a server on an ephemeral port against `backend`.
pub async fn spawn_server(config: AppConfig, backend: MemoryBackend) -> TestServer {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = startup::build_state(config, Arc::new(backend.clone()));
    let shutdown = Shutdown::new();
    let server = HttpServer::new(state.clone());
    let server_shutdown = shutdown.clone();
    let task = tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        backend,
        state,
        shutdown,
        task,
    }
}

pub async fn spawn_demo() -> TestServer {
    spawn_server(test_config(), demo_backend()).await
}
