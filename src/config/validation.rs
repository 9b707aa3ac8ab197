//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ceilings ordered, addresses parse)
//! - Check that timeouts are consistent with each other
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AppConfig, BackendKind};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `session.lock_timeout_secs`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let session = &config.session;
    if session.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("session.idle_timeout_secs", "must be greater than 0"));
    }
    if session.lock_poll_interval_ms == 0 {
        errors.push(ValidationError::new("session.lock_poll_interval_ms", "must be greater than 0"));
    }
    if session.lock_timeout() < session.lock_poll_interval() {
        errors.push(ValidationError::new(
            "session.lock_timeout_secs",
            "must not be shorter than the lock poll interval",
        ));
    }
    if session.sweep_enabled && session.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("session.sweep_interval_secs", "must be greater than 0"));
    }
    if session.cookie_name.is_empty() {
        errors.push(ValidationError::new("session.cookie_name", "must not be empty"));
    }

    if config.timeouts.request_secs <= session.lock_timeout_secs {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must exceed session.lock_timeout_secs so busy sessions answer 503, not a timeout",
        ));
    }

    let backend = &config.backend;
    if backend.kind == BackendKind::Http && url::Url::parse(&backend.url).is_err() {
        errors.push(ValidationError::new(
            "backend.url",
            format!("'{}' is not a valid URL", backend.url),
        ));
    }
    if backend.max_connections == 0 {
        errors.push(ValidationError::new("backend.max_connections", "must be greater than 0"));
    }
    if backend.prefill_connections > backend.max_connections {
        errors.push(ValidationError::new(
            "backend.prefill_connections",
            "must not exceed backend.max_connections",
        ));
    }

    let cache = &config.cache;
    if cache.max_item_bytes > cache.max_total_bytes {
        errors.push(ValidationError::new(
            "cache.max_item_bytes",
            "must not exceed cache.max_total_bytes",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
