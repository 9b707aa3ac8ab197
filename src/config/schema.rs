//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so a minimal (even empty) file is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the session server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Session lifetime and lock waiting.
    pub session: SessionConfig,

    /// Backend connection and pool settings.
    pub backend: BackendConfig,

    /// Resource cache ceilings and well-known resource codes.
    pub cache: CacheConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Session lifetime and per-session lock settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session becomes eligible for sweeping.
    pub idle_timeout_secs: u64,

    /// Upper bound between lock attempts while waiting.
    pub lock_poll_interval_ms: u64,

    /// How long a request waits for a busy session before giving up.
    pub lock_timeout_secs: u64,

    /// Run the background expiry sweep.
    pub sweep_enabled: bool,

    /// Interval between expiry sweeps in seconds.
    pub sweep_interval_secs: u64,

    /// Cookie that carries the session token.
    pub cookie_name: String,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60 * 60,
            lock_poll_interval_ms: 500,
            lock_timeout_secs: 30,
            sweep_enabled: true,
            sweep_interval_secs: 60,
            cookie_name: "st".to_string(),
        }
    }
}

/// Which backend implementation to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote backend over HTTP/JSON.
    Http,
    /// In-process backend; development only.
    Memory,
}

/// Backend connection and pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Base URL of the HTTP backend.
    pub url: String,

    /// Application name reported when opening a handle.
    pub app_name: String,

    /// Per-call deadline in seconds. 0 disables the deadline.
    pub call_timeout_secs: u64,

    /// Soft maximum number of connections. Exceeding it only logs a warning.
    pub max_connections: usize,

    /// Connections to open at startup.
    pub prefill_connections: usize,

    /// Passed to `init_session` on every fresh or recycled connection.
    pub server_prefix: Option<String>,

    /// Token used to authenticate the anonymous identity on pooled connections.
    pub auto_user_token: Option<String>,
}

impl BackendConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Http,
            url: "http://127.0.0.1:9000/".to_string(),
            app_name: "session-server".to_string(),
            call_timeout_secs: 60,
            max_connections: 100,
            prefill_connections: 0,
            server_prefix: None,
            auto_user_token: None,
        }
    }
}

/// Resource cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Largest single resource that will be cached.
    pub max_item_bytes: usize,

    /// Ceiling on the sum of all cached resource sizes.
    pub max_total_bytes: usize,

    /// Served with 401 when a resource requires a login.
    pub login_resource: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_item_bytes: 100 * 1024 * 1024,   // 100MB
            max_total_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            login_resource: "login.html".to_string(),
        }
    }
}

/// Timeout configuration for HTTP requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    /// Must cover the session lock wait.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin API under `/admin`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(3600));
        assert_eq!(config.session.lock_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.session.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.backend.max_connections, 100);
        assert_eq!(config.cache.max_item_bytes, 100 * 1024 * 1024);
        assert_eq!(config.backend.kind, BackendKind::Http);
    }

    #[test]
    fn test_partial_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [backend]
            kind = "memory"
            call_timeout_secs = 0
            auto_user_token = "public"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.backend.call_timeout(), None);
        assert_eq!(config.backend.auto_user_token.as_deref(), Some("public"));
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.backend.app_name, "session-server");
    }
}
